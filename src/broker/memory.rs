//! In-process topic hub

use super::{Broker, BrokerError, Envelope, Subscription};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const DEFAULT_CAPACITY: usize = 1024;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

struct Inner {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Inner {
    fn remove(&self, id: u64) {
        let mut topics = self.topics.write();
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }
}

/// Counters for the hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBrokerStats {
    pub published: u64,
    pub dropped: u64,
    pub topics: usize,
}

/// Topic hub for a single process. Each subscription gets a bounded queue;
/// a full queue drops the message for that subscriber only.
///
/// Clone-able via internal Arc.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Hub whose subscriber queues hold `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Drop every subscriber and refuse further traffic
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.topics.write().clear();
        tracing::info!("Memory broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> MemoryBrokerStats {
        MemoryBrokerStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            topics: self.inner.topics.read().len(),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, envelope: Envelope) -> Result<usize, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let topics = self.inner.topics.read();
        let Some(subscribers) = topics.get(&envelope.topic) else {
            return Ok(0);
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            match subscriber.tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %envelope.topic,
                        subscriber = subscriber.id,
                        "Subscriber queue full, dropping message"
                    );
                }
                // Receiver gone; entry is removed when its subscription drops
                Err(TrySendError::Closed(_)) => {}
            }
        }

        Ok(delivered)
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        {
            let mut map = self.inner.topics.write();
            for topic in topics {
                map.entry(topic.clone()).or_default().push(Subscriber {
                    id,
                    tx: tx.clone(),
                });
            }
        }

        tracing::debug!(id, ?topics, "Subscribed");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let on_drop = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        });

        Ok(Subscription::new(topics.to_vec(), rx, Some(on_drop)))
    }
}
