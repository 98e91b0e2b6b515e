use super::{Broker, BrokerStream};
use crate::error::HubError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

/// Redis pub/sub broker.
///
/// Publishes go through one shared [`ConnectionManager`]; every subscription
/// gets a dedicated pub/sub connection, closed when its stream is dropped.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    /// Connects the publishing side; fails if the server cannot be reached
    pub async fn connect(redis_url: &str) -> Result<Self, HubError> {
        let client = Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        info!("connected to redis broker");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError> {
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(topic, &payload[..]).await?;

        debug!(topic = %topic, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, HubError> {
        // PubSub needs a dedicated connection, not the multiplexed one
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        debug!(topic = %topic, "subscribed to redis topic");

        let topic = topic.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = msg.get_payload::<Vec<u8>>();
            let topic = topic.clone();
            async move {
                match payload {
                    Ok(payload) => Some(Bytes::from(payload)),
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "dropping unreadable redis payload");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
