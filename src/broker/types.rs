//! Broker message and subscription types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message on a topic. Also the line format of the stdio relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Serialize a payload for a topic
    pub fn new<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, BrokerError> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Deserialize the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection is gone
    #[error("broker connection closed")]
    Closed,
    /// Payload could not be serialized
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a bounded receive
#[derive(Debug)]
pub enum Received {
    Message(Envelope),
    Timeout,
    Closed,
}

/// A live subscription to one or more topics. Dropping it unsubscribes.
pub struct Subscription {
    topics: Vec<String>,
    rx: mpsc::Receiver<Envelope>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Build a subscription; `on_drop` runs once when it is dropped
    pub fn new(
        topics: Vec<String>,
        rx: mpsc::Receiver<Envelope>,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self {
            topics,
            rx,
            on_drop,
        }
    }

    /// Subscribed topics
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Wait for the next message
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Wait at most `timeout` for the next message
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(envelope)) => Received::Message(envelope),
            Ok(None) => Received::Closed,
            Err(_) => Received::Timeout,
        }
    }

    /// Take a message if one is queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topics", &self.topics)
            .finish()
    }
}
