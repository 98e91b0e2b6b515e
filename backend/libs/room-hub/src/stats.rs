//! Counters for hub activity

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time view of hub activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub connections_registered: u64,
    pub connections_unregistered: u64,
    pub connections_evicted: u64,
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub broker_publish_failures: u64,
    /// Connections currently in the membership table
    pub active_connections: u64,
    /// Channels with at least one local connection
    pub active_channels: u64,
}

/// Shared, lock-free counters.
///
/// The hub writes most fields from its event loop; backends record broker
/// failures. Readers take a [`HubStats`] snapshot without going through the actor.
#[derive(Clone, Default)]
pub struct StatsCollector {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    unregistered: AtomicU64,
    evicted: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    broker_failures: AtomicU64,
    active_connections: AtomicU64,
    active_channels: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_register(&self) {
        self.inner.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregister(&self) {
        self.inner.unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.inner.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: u64) {
        self.inner.delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_broker_failure(&self) {
        self.inner.broker_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_gauges(&self, connections: usize, channels: usize) {
        self.inner
            .active_connections
            .store(connections as u64, Ordering::Relaxed);
        self.inner
            .active_channels
            .store(channels as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStats {
        let c = &self.inner;
        HubStats {
            connections_registered: c.registered.load(Ordering::Relaxed),
            connections_unregistered: c.unregistered.load(Ordering::Relaxed),
            connections_evicted: c.evicted.load(Ordering::Relaxed),
            messages_published: c.published.load(Ordering::Relaxed),
            messages_delivered: c.delivered.load(Ordering::Relaxed),
            broker_publish_failures: c.broker_failures.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            active_channels: c.active_channels.load(Ordering::Relaxed),
        }
    }
}
