//! The coordinator: single owner of the channel membership table.
//!
//! All register / unregister / publish events funnel through one bounded
//! inbox and are handled one at a time by synchronous code, so the table needs
//! no lock and the loop can never block on a slow consumer.

use crate::channel::ChannelName;
use crate::connection::{ConnectionHandle, ConnectionId, Delivery};
use crate::error::HubError;
use crate::message::Message;
use crate::stats::{HubStats, StatsCollector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Inbox size used when the caller does not pick one
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bound of the coordinator's event inbox
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Change in local interest for a channel, emitted by the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// First local connection joined
    Opened(ChannelName),
    /// Last local connection left
    Closed(ChannelName),
}

pub(crate) enum HubEvent {
    Register(ConnectionHandle),
    Unregister {
        id: ConnectionId,
        channel: ChannelName,
    },
    Publish(Message),
    ChannelSize {
        channel: ChannelName,
        reply: oneshot::Sender<usize>,
    },
    Channels {
        reply: oneshot::Sender<Vec<(ChannelName, usize)>>,
    },
}

/// Cloneable sender side of the coordinator
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    stats: StatsCollector,
}

impl HubHandle {
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.send(HubEvent::Register(handle)).await
    }

    /// Removing a connection that is not registered is a no-op
    pub async fn unregister(&self, id: ConnectionId, channel: ChannelName) -> Result<(), HubError> {
        self.send(HubEvent::Unregister { id, channel }).await
    }

    pub async fn publish(&self, message: Message) -> Result<(), HubError> {
        self.send(HubEvent::Publish(message)).await
    }

    /// Number of local connections in `channel`.
    ///
    /// Answered in inbox order, so every event sent before this call has been
    /// applied when it returns.
    pub async fn channel_size(&self, channel: &ChannelName) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::ChannelSize {
            channel: channel.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Every channel with local connections, sorted by name
    pub async fn channels(&self) -> Result<Vec<(ChannelName, usize)>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Channels { reply }).await?;
        rx.await.map_err(|_| HubError::HubClosed)
    }

    pub fn stats(&self) -> HubStats {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub(crate) fn collector(&self) -> &StatsCollector {
        &self.stats
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events
            .send(event)
            .await
            .map_err(|_| HubError::HubClosed)
    }
}

/// Proof of membership returned by a backend's `register`.
///
/// [`unregister`](Registration::unregister) is idempotent. Dropping an
/// unreleased registration makes a best-effort unregister without waiting.
pub struct Registration {
    hub: HubHandle,
    id: ConnectionId,
    channel: ChannelName,
    released: AtomicBool,
}

impl Registration {
    pub(crate) fn new(hub: HubHandle, handle: &ConnectionHandle) -> Self {
        Self {
            hub,
            id: handle.id(),
            channel: handle.channel().clone(),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub async fn unregister(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.hub.unregister(self.id, self.channel.clone()).await {
            debug!(connection_id = %self.id, error = %e, "hub gone before unregister");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let event = HubEvent::Unregister {
            id: self.id,
            channel: self.channel.clone(),
        };
        if self.hub.events.try_send(event).is_err() {
            trace!(connection_id = %self.id, "deferred unregister to dead-consumer cleanup");
        }
    }
}

pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    table: HashMap<ChannelName, HashMap<ConnectionId, ConnectionHandle>>,
    interest: Option<mpsc::UnboundedSender<Interest>>,
    stats: StatsCollector,
    connections: usize,
}

impl Hub {
    /// Starts a coordinator task and returns its handle
    pub fn spawn(config: HubConfig) -> HubHandle {
        Self::start(config, None)
    }

    /// Like [`spawn`](Self::spawn), also reporting channels that gain their
    /// first or lose their last local connection
    pub fn spawn_with_interest(config: HubConfig) -> (HubHandle, mpsc::UnboundedReceiver<Interest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::start(config, Some(tx)), rx)
    }

    fn start(config: HubConfig, interest: Option<mpsc::UnboundedSender<Interest>>) -> HubHandle {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let stats = StatsCollector::new();

        let hub = Hub {
            events: rx,
            table: HashMap::new(),
            interest,
            stats: stats.clone(),
            connections: 0,
        };
        tokio::spawn(hub.run());

        HubHandle { events: tx, stats }
    }

    async fn run(mut self) {
        debug!("hub started");

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        self.shutdown();
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(handle) => self.register(handle),
            HubEvent::Unregister { id, channel } => self.unregister(id, &channel),
            HubEvent::Publish(message) => self.publish(message),
            HubEvent::ChannelSize { channel, reply } => {
                let size = self.table.get(&channel).map(|m| m.len()).unwrap_or(0);
                let _ = reply.send(size);
            }
            HubEvent::Channels { reply } => {
                let mut channels: Vec<_> = self
                    .table
                    .iter()
                    .map(|(channel, members)| (channel.clone(), members.len()))
                    .collect();
                channels.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(channels);
            }
        }
    }

    fn register(&mut self, handle: ConnectionHandle) {
        if handle.is_closed() {
            debug!(connection_id = %handle.id(), "ignoring register of closed connection");
            return;
        }

        let channel = handle.channel().clone();
        let id = handle.id();
        let opened = !self.table.contains_key(&channel);

        let members = self.table.entry(channel.clone()).or_default();
        let is_new = members.insert(id, handle).is_none();
        let size = members.len();

        if is_new {
            self.connections += 1;
            self.stats.record_register();
        }
        if opened {
            self.notify(Interest::Opened(channel.clone()));
        }
        self.refresh_gauges();

        debug!(connection_id = %id, channel = %channel, members = size, "registered");
    }

    fn unregister(&mut self, id: ConnectionId, channel: &ChannelName) {
        match self.remove(channel, id) {
            Some(_) => {
                self.stats.record_unregister();
                debug!(connection_id = %id, channel = %channel, "unregistered");
            }
            None => trace!(connection_id = %id, channel = %channel, "unregister of absent connection"),
        }
    }

    fn publish(&mut self, message: Message) {
        self.stats.record_publish();

        let Some(members) = self.table.get(message.channel()) else {
            trace!(channel = %message.channel(), "publish to channel without local members");
            return;
        };

        let mut delivered = 0u64;
        let mut dropped = Vec::new();

        for (id, handle) in members {
            match handle.try_deliver(message.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => dropped.push((*id, true)),
                Delivery::Gone => dropped.push((*id, false)),
            }
        }
        self.stats.record_delivered(delivered);

        for (id, slow) in dropped {
            let Some(handle) = self.remove(message.channel(), id) else {
                continue;
            };
            if slow {
                self.stats.record_eviction();
                warn!(connection_id = %id, channel = %message.channel(), "evicting slow consumer");
            } else {
                debug!(connection_id = %id, channel = %message.channel(), "dropping connection with closed queue");
            }
            handle.close();
        }
    }

    fn remove(&mut self, channel: &ChannelName, id: ConnectionId) -> Option<ConnectionHandle> {
        let members = self.table.get_mut(channel)?;
        let handle = members.remove(&id)?;
        let emptied = members.is_empty();

        self.connections -= 1;
        if emptied {
            self.table.remove(channel);
            self.notify(Interest::Closed(channel.clone()));
        }
        self.refresh_gauges();

        Some(handle)
    }

    fn notify(&self, change: Interest) {
        if let Some(tx) = &self.interest {
            let _ = tx.send(change);
        }
    }

    fn refresh_gauges(&self) {
        self.stats.set_gauges(self.connections, self.table.len());
    }

    fn shutdown(&mut self) {
        let remaining = self.connections;
        for (_, members) in self.table.drain() {
            for (_, handle) in members {
                handle.close();
            }
        }
        self.connections = 0;
        self.refresh_gauges();

        info!(closed = remaining, "hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> ChannelName {
        ChannelName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister_update_membership() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, _outbound) = ConnectionHandle::new(room("room1"), 8);

        hub.register(handle.clone()).await.unwrap();
        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 1);

        hub.unregister(handle.id(), room("room1")).await.unwrap();
        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 0);
        assert!(hub.channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_twice_keeps_single_membership() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, _outbound) = ConnectionHandle::new(room("room1"), 8);

        hub.register(handle.clone()).await.unwrap();
        hub.register(handle.clone()).await.unwrap();

        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 1);
        assert_eq!(hub.stats().connections_registered, 1);
    }

    #[tokio::test]
    async fn test_closed_handle_is_not_registered() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, _outbound) = ConnectionHandle::new(room("room1"), 8);
        handle.close();

        hub.register(handle).await.unwrap();
        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_interest_opened_and_closed() {
        let (hub, mut interest) = Hub::spawn_with_interest(HubConfig::default());
        let (a, _oa) = ConnectionHandle::new(room("room1"), 8);
        let (b, _ob) = ConnectionHandle::new(room("room1"), 8);

        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();
        hub.unregister(a.id(), room("room1")).await.unwrap();
        hub.unregister(b.id(), room("room1")).await.unwrap();
        hub.channel_size(&room("room1")).await.unwrap();

        assert_eq!(interest.try_recv().unwrap(), Interest::Opened(room("room1")));
        assert_eq!(interest.try_recv().unwrap(), Interest::Closed(room("room1")));
        assert!(interest.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_outbound_is_pruned_on_publish() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, outbound) = ConnectionHandle::new(room("room1"), 8);
        hub.register(handle.clone()).await.unwrap();
        drop(outbound);

        hub.publish(Message::new(room("room1"), "hello")).await.unwrap();
        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 0);
        assert!(handle.is_closed());
        assert_eq!(hub.stats().connections_evicted, 0);
    }

    #[tokio::test]
    async fn test_dropping_registration_unregisters() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, _outbound) = ConnectionHandle::new(room("room1"), 8);
        hub.register(handle.clone()).await.unwrap();

        let registration = Registration::new(hub.clone(), &handle);
        drop(registration);

        assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_members() {
        let hub = Hub::spawn(HubConfig::default());
        let (handle, outbound) = ConnectionHandle::new(room("room1"), 8);
        hub.register(handle.clone()).await.unwrap();
        hub.channel_size(&room("room1")).await.unwrap();

        drop(hub);
        tokio::time::timeout(std::time::Duration::from_secs(1), outbound.closed())
            .await
            .expect("hub shutdown should close registered connections");
    }
}
