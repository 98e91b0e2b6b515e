//! Broker-backed backend.
//!
//! ```text
//!  publish ──▶ broker topic ──▶ every process subscribed to the topic
//!                                   │
//!                         TopicListener task
//!                                   │
//!                                   ▼
//!                             local Hub fan-out
//! ```
//!
//! A process holds at most one broker subscription per channel, and only while
//! it has at least one local connection in that channel. Subscriptions are
//! owned by a single manager task driven by the hub's interest events.

use super::{Backend, BackendKind};
use crate::broker::{Broker, BrokerStream};
use crate::channel::ChannelName;
use crate::connection::ConnectionHandle;
use crate::error::HubError;
use crate::hub::{Hub, HubConfig, HubHandle, Interest, Registration};
use crate::message::Message;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Wait before re-subscribing a topic whose stream ended or failed
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

pub struct DistributedBackend<B: Broker> {
    hub: HubHandle,
    broker: Arc<B>,
    topic_prefix: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    manager: JoinHandle<()>,
}

impl<B: Broker> DistributedBackend<B> {
    /// Topics are the bare channel names
    pub fn new(broker: B, config: HubConfig) -> Self {
        Self::with_topic_prefix(broker, config, String::new())
    }

    pub fn with_topic_prefix(broker: B, config: HubConfig, topic_prefix: impl Into<String>) -> Self {
        let broker = Arc::new(broker);
        let topic_prefix: Arc<str> = Arc::from(topic_prefix.into());
        let (hub, interest) = Hub::spawn_with_interest(config);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let manager = SubscriptionManager {
            hub: hub.clone(),
            broker: Arc::clone(&broker),
            topic_prefix: Arc::clone(&topic_prefix),
            commands: commands.clone(),
            listeners: HashMap::new(),
            pending: HashMap::new(),
            generation: 0,
        };
        let manager = tokio::spawn(manager.run(commands_rx, interest));

        Self {
            hub,
            broker,
            topic_prefix,
            commands,
            manager,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Broker topic carrying `channel`
    pub fn topic(&self, channel: &ChannelName) -> String {
        topic_for(&self.topic_prefix, channel)
    }
}

impl<B: Broker> Drop for DistributedBackend<B> {
    fn drop(&mut self) {
        // Listeners hold hub handles; stopping the manager releases them
        self.manager.abort();
    }
}

#[async_trait]
impl<B: Broker> Backend for DistributedBackend<B> {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Hands the payload to the broker only. Local members receive it through
    /// this process's own subscription, like every other process.
    async fn publish(&self, message: Message) -> Result<(), HubError> {
        let topic = self.topic(message.channel());

        if let Err(e) = self.broker.publish(&topic, message.into_payload()).await {
            self.hub.collector().record_broker_failure();
            warn!(topic = %topic, error = %e, "broker publish failed");
            return Err(e);
        }
        Ok(())
    }

    /// Makes sure the channel's topic is subscribed before the connection
    /// joins, so it cannot miss messages published after registration.
    async fn register(&self, handle: ConnectionHandle) -> Result<Registration, HubError> {
        let pending = self.ensure(handle.channel()).await?;

        let registration = Registration::new(self.hub.clone(), &handle);
        let joined = self.hub.register(handle).await;
        drop(pending);
        joined?;
        Ok(registration)
    }
}

impl<B: Broker> DistributedBackend<B> {
    /// Subscribes the channel's topic and pins it until the returned guard
    /// is dropped, so a concurrent last-member leave cannot release it.
    async fn ensure(&self, channel: &ChannelName) -> Result<PendingJoin, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Ensure {
                channel: channel.clone(),
                reply,
            })
            .map_err(|_| HubError::HubClosed)?;
        rx.await.map_err(|_| HubError::HubClosed)??;

        Ok(PendingJoin {
            channel: channel.clone(),
            commands: self.commands.clone(),
        })
    }
}

/// A join between its subscription and its hub registration
struct PendingJoin {
    channel: ChannelName,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for PendingJoin {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Joined {
            channel: self.channel.clone(),
        });
    }
}

fn topic_for(prefix: &str, channel: &ChannelName) -> String {
    format!("{}{}", prefix, channel.as_str())
}

enum Command {
    Ensure {
        channel: ChannelName,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    /// A join that sent `Ensure` reached the hub or gave up
    Joined {
        channel: ChannelName,
    },
    /// A listener's broker stream ended
    Lost {
        channel: ChannelName,
        generation: u64,
    },
    Resubscribe {
        channel: ChannelName,
    },
}

/// A running subscription; dropping it aborts the task and with it the
/// broker stream.
struct TopicListener {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for TopicListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SubscriptionManager<B: Broker> {
    hub: HubHandle,
    broker: Arc<B>,
    topic_prefix: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    listeners: HashMap<ChannelName, TopicListener>,
    /// Joins per channel that are subscribed but not yet registered
    pending: HashMap<ChannelName, usize>,
    generation: u64,
}

impl<B: Broker> SubscriptionManager<B> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut interest: mpsc::UnboundedReceiver<Interest>,
    ) {
        debug!("subscription manager started");

        loop {
            tokio::select! {
                biased;
                Some(change) = interest.recv() => self.on_interest(change).await,
                Some(command) = commands.recv() => self.on_command(command).await,
                else => break,
            }
        }

        debug!("subscription manager stopped");
    }

    async fn on_interest(&mut self, change: Interest) {
        match change {
            Interest::Opened(channel) => {
                if let Err(e) = self.subscribe(&channel).await {
                    warn!(channel = %channel, error = %e, "subscribe failed, retrying");
                    self.schedule_resubscribe(channel);
                }
            }
            Interest::Closed(channel) => {
                if self.pending.contains_key(&channel) {
                    debug!(channel = %channel, "channel emptied with a join in flight");
                    return;
                }
                self.release(&channel);
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Ensure { channel, reply } => {
                let result = self.subscribe(&channel).await;
                match &result {
                    Ok(()) => *self.pending.entry(channel).or_insert(0) += 1,
                    Err(e) => warn!(channel = %channel, error = %e, "subscribe failed"),
                }
                let _ = reply.send(result);
            }
            Command::Joined { channel } => {
                let Some(count) = self.pending.get_mut(&channel) else {
                    return;
                };
                *count -= 1;
                if *count > 0 {
                    return;
                }
                self.pending.remove(&channel);

                if !self.has_members(&channel).await {
                    self.release(&channel);
                }
            }
            Command::Lost {
                channel,
                generation,
            } => {
                let current = self
                    .listeners
                    .get(&channel)
                    .is_some_and(|listener| listener.generation == generation);
                if !current {
                    return;
                }
                self.listeners.remove(&channel);

                if self.pending.contains_key(&channel) || self.has_members(&channel).await {
                    warn!(channel = %channel, "broker subscription lost, resubscribing");
                    self.schedule_resubscribe(channel);
                }
            }
            Command::Resubscribe { channel } => {
                if self.listeners.contains_key(&channel) {
                    return;
                }
                if !self.pending.contains_key(&channel) && !self.has_members(&channel).await {
                    return;
                }
                if let Err(e) = self.subscribe(&channel).await {
                    warn!(channel = %channel, error = %e, "resubscribe failed, retrying");
                    self.schedule_resubscribe(channel);
                }
            }
        }
    }

    async fn subscribe(&mut self, channel: &ChannelName) -> Result<(), HubError> {
        if self.listeners.contains_key(channel) {
            return Ok(());
        }

        let topic = topic_for(&self.topic_prefix, channel);
        let stream = self.broker.subscribe(&topic).await?;

        self.generation += 1;
        let task = tokio::spawn(listen(
            stream,
            channel.clone(),
            self.generation,
            self.hub.clone(),
            self.commands.clone(),
        ));
        self.listeners.insert(
            channel.clone(),
            TopicListener {
                generation: self.generation,
                task,
            },
        );

        info!(channel = %channel, topic = %topic, "subscribed to broker topic");
        Ok(())
    }

    fn release(&mut self, channel: &ChannelName) {
        if self.listeners.remove(channel).is_some() {
            info!(channel = %channel, "unsubscribed from broker topic");
        }
    }

    async fn has_members(&self, channel: &ChannelName) -> bool {
        match self.hub.channel_size(channel).await {
            Ok(size) => size > 0,
            Err(_) => false,
        }
    }

    fn schedule_resubscribe(&self, channel: ChannelName) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            let _ = commands.send(Command::Resubscribe { channel });
        });
    }
}

async fn listen(
    mut stream: BrokerStream,
    channel: ChannelName,
    generation: u64,
    hub: HubHandle,
    commands: mpsc::UnboundedSender<Command>,
) {
    while let Some(payload) = stream.next().await {
        if hub
            .publish(Message::new(channel.clone(), payload))
            .await
            .is_err()
        {
            error!(channel = %channel, "hub closed, stopping broker listener");
            return;
        }
    }

    let _ = commands.send(Command::Lost {
        channel,
        generation,
    });
}
