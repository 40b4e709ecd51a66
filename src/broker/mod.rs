//! Publish/subscribe transport
//!
//! All asynchronous messaging between the bridge, the bootstrap service and
//! the strategy process goes through a [`Broker`].

mod memory;
pub mod topics;
mod types;

pub use memory::{MemoryBroker, MemoryBrokerStats};
pub use types::{BrokerError, Envelope, Received, Subscription};

use async_trait::async_trait;
use serde::Serialize;

/// Trait for pub/sub transports
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a message; returns the number of subscribers it reached
    async fn publish(&self, envelope: Envelope) -> Result<usize, BrokerError>;
    /// Subscribe to a set of topics on one queue
    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError>;
}

/// Serialize `payload` and publish it on `topic`
pub async fn publish_json<T: Serialize + ?Sized>(
    broker: &dyn Broker,
    topic: &str,
    payload: &T,
) -> Result<usize, BrokerError> {
    let envelope = Envelope::new(topic, payload)?;
    broker.publish(envelope).await
}
