use super::{Broker, BrokerStream};
use crate::error::HubError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

const TOPIC_CAPACITY: usize = 1024;

/// In-process broker: one broadcast channel per topic.
///
/// Clones share topics, so several distributed backends in one process behave
/// like several server instances on one Redis. Can be switched offline to
/// simulate an outage.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    offline: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.inner.offline.store(!available, Ordering::Release);
    }

    /// Live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Ends every live stream on `topic`, like a broker dropping its
    /// subscriber connections. Later subscribes open the topic afresh.
    pub fn drop_subscribers(&self, topic: &str) -> usize {
        self.topics()
            .remove(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<Bytes>>> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), HubError> {
        if self.inner.offline.load(Ordering::Acquire) {
            return Err(HubError::BackendUnavailable(
                "memory broker offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError> {
        self.check_available()?;

        let sender = self.topics().get(topic).cloned();
        if let Some(tx) = sender {
            // no receivers is fine
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, HubError> {
        self.check_available()?;

        let rx = self
            .topics()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        let topic = topic.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let topic = topic.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "memory broker subscriber lagged");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
