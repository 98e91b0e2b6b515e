//! Channel pub/sub hub for long-lived client connections
//!
//! Connections join exactly one named channel ("room"). Any frame a connection
//! sends is published to every connection in the same channel, the sender
//! included. Fan-out never waits on a slow consumer: a connection whose
//! outbound queue is full is evicted instead.
//!
//! # Architecture
//!
//! ```text
//! transport ──frames──▶ read task ──publish──▶ Backend
//!                                               │
//!                     Local: straight to hub    │   Distributed: broker topic,
//!                                               │   back in via subscription
//!                                               ▼
//!                                   Hub (single owner of membership)
//!                                               │ try_send, evict when full
//!                                               ▼
//!                      outbound queue ──▶ write task ──frames──▶ transport
//! ```
//!
//! # Example
//!
//! ```no_run
//! use room_hub::{memory_transport, ChannelContext, ChannelName, Connector, LocalBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), room_hub::HubError> {
//!     let connector = Connector::new(Arc::new(LocalBackend::default()));
//!
//!     let ctx = ChannelContext::new().attach_channel(ChannelName::new("room1")?);
//!     let (source, sink, mut peer) = memory_transport(16);
//!     let connection = connector.connect(&ctx, source, sink).await?;
//!
//!     peer.send("hello").await;
//!     assert_eq!(peer.recv().await.as_deref(), Some(&b"hello"[..]));
//!
//!     connection.close();
//!     connection.join().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod broker;
pub mod channel;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod stats;
pub mod transport;

pub use backend::{
    build_backend, Backend, BackendKind, BackendSettings, DistributedBackend, LocalBackend,
};
pub use broker::{Broker, BrokerStream, MemoryBroker, RedisBroker};
pub use channel::{ChannelContext, ChannelName, MAX_CHANNEL_LEN};
pub use connection::{
    ActiveConnection, ConnectionHandle, ConnectionId, ConnectionState, Connector, Outbound,
    DEFAULT_OUTBOUND_CAPACITY,
};
pub use error::{HubError, TransportError};
pub use hub::{Hub, HubConfig, HubHandle, Interest, Registration, DEFAULT_EVENT_CAPACITY};
pub use message::Message;
pub use stats::{HubStats, StatsCollector};
pub use transport::{
    memory_transport, ChannelSink, ChannelSource, FrameSink, FrameSource, MemoryPeer,
};
