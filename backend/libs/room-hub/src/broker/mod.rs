//! Broker wire contract used by the distributed backend.
//!
//! A broker moves opaque payloads between processes by topic. No envelope is
//! added: what is published is exactly what subscribers receive.

mod memory;
mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

use crate::error::HubError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

/// Payloads delivered on one subscribed topic. Dropping it unsubscribes.
pub type BrokerStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Fails with [`HubError::BackendUnavailable`] when the broker cannot be reached
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError>;

    /// Resolves once the subscription is live on the broker
    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, HubError>;
}
