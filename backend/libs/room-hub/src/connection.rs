//! Per-connection state and the read/write task pair that drives it.
//!
//! ```text
//! Connecting ──register ok──▶ Registered ──transport error / eviction / close()──▶ Draining ──▶ Closed
//!      │                                                                                   ▲
//!      └──────────────────────────── register failed ──────────────────────────────────────┘
//! ```

use crate::backend::Backend;
use crate::channel::{ChannelContext, ChannelName};
use crate::error::HubError;
use crate::hub::Registration;
use crate::message::Message;
use crate::transport::{FrameSink, FrameSource};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Outbound queue size used when the caller does not pick one
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Unique identifier of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One-shot close signal shared by a handle, its queue and its tasks.
#[derive(Clone)]
pub(crate) struct Closer {
    tx: Arc<watch::Sender<bool>>,
}

impl Closer {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal. Returns true only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

pub(crate) enum Delivery {
    Queued,
    /// Queue at capacity: slow consumer
    Full,
    /// Consumer side dropped
    Gone,
}

/// Core-visible state of a connection: identity, channel and the producer end
/// of its bounded outbound queue.
///
/// Clones refer to the same connection. The hub keeps one in its membership
/// table while the connection is registered.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    channel: ChannelName,
    queue: mpsc::Sender<Message>,
    closer: Closer,
}

impl ConnectionHandle {
    /// Creates a handle for `channel` and the consumer end of its queue.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(channel: ChannelName, capacity: usize) -> (Self, Outbound) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let closer = Closer::new();

        let handle = Self {
            id: ConnectionId::new(),
            channel,
            queue,
            closer: closer.clone(),
        };

        (handle, Outbound { rx, closer })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Fires the close signal; the write task tears the transport down
    pub fn close(&self) -> bool {
        self.closer.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub(crate) fn try_deliver(&self, message: Message) -> Delivery {
        match self.queue.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer end of a connection's outbound queue
pub struct Outbound {
    rx: mpsc::Receiver<Message>,
    closer: Closer,
}

impl Outbound {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Whether the connection has been closed (evicted, failed or removed)
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub async fn closed(&self) {
        self.closer.closed().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Draining = 2,
    Closed = 3,
}

#[derive(Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Turns accepted transports into registered connections.
///
/// The channel must already be resolved by the caller; the connector never
/// guesses one.
#[derive(Clone)]
pub struct Connector {
    backend: Arc<dyn Backend>,
    outbound_capacity: usize,
}

impl Connector {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Registers a connection for the channel attached to `ctx`.
    ///
    /// Fails with [`HubError::ChannelMissing`] (closing the sink) when the
    /// context carries no channel.
    pub async fn connect<R, W>(
        &self,
        ctx: &ChannelContext,
        source: R,
        mut sink: W,
    ) -> Result<ActiveConnection, HubError>
    where
        R: FrameSource,
        W: FrameSink,
    {
        let channel = match ctx.require_channel() {
            Ok(channel) => channel.clone(),
            Err(e) => {
                sink.close().await;
                return Err(e);
            }
        };
        self.connect_to(channel, source, sink).await
    }

    pub async fn connect_to<R, W>(
        &self,
        channel: ChannelName,
        source: R,
        sink: W,
    ) -> Result<ActiveConnection, HubError>
    where
        R: FrameSource,
        W: FrameSink,
    {
        self.connect_with_capacity(channel, self.outbound_capacity, source, sink)
            .await
    }

    pub async fn connect_with_capacity<R, W>(
        &self,
        channel: ChannelName,
        capacity: usize,
        source: R,
        mut sink: W,
    ) -> Result<ActiveConnection, HubError>
    where
        R: FrameSource,
        W: FrameSink,
    {
        let state = StateCell::new();
        let (handle, outbound) = ConnectionHandle::new(channel.clone(), capacity);
        let id = handle.id();

        let registration = match self.backend.register(handle).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(connection_id = %id, channel = %channel, error = %e, "register failed");
                sink.close().await;
                return Err(e);
            }
        };
        state.set(ConnectionState::Registered);
        debug!(connection_id = %id, channel = %channel, "connection registered");

        let closer = outbound.closer.clone();

        let read_task = tokio::spawn(read_loop(
            source,
            Arc::clone(&self.backend),
            id,
            channel.clone(),
            closer.clone(),
        ));
        let write_task = tokio::spawn(write_loop(sink, outbound, registration, state.clone()));

        Ok(ActiveConnection {
            id,
            channel,
            closer,
            state,
            read_task,
            write_task,
        })
    }
}

async fn read_loop<R: FrameSource>(
    mut source: R,
    backend: Arc<dyn Backend>,
    id: ConnectionId,
    channel: ChannelName,
    closer: Closer,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = closer.closed() => break,
            frame = source.recv_frame() => frame,
        };

        match frame {
            Some(Ok(payload)) => {
                let message = Message::new(channel.clone(), payload);
                if let Err(e) = backend.publish(message).await {
                    warn!(connection_id = %id, channel = %channel, error = %e, "publish failed, closing connection");
                    break;
                }
            }
            Some(Err(e)) => {
                debug!(connection_id = %id, channel = %channel, error = %e, "read failed");
                break;
            }
            None => {
                debug!(connection_id = %id, channel = %channel, "remote closed");
                break;
            }
        }
    }

    closer.close();
}

async fn write_loop<W: FrameSink>(
    mut sink: W,
    mut outbound: Outbound,
    registration: Registration,
    state: StateCell,
) {
    let closer = outbound.closer.clone();

    loop {
        let next = tokio::select! {
            biased;
            _ = closer.closed() => break,
            next = outbound.recv() => next,
        };
        let Some(message) = next else {
            break;
        };

        let sent = tokio::select! {
            biased;
            _ = closer.closed() => break,
            sent = sink.send_frame(message.into_payload()) => sent,
        };
        if let Err(e) = sent {
            debug!(
                connection_id = %registration.id(),
                channel = %registration.channel(),
                error = %e,
                "write failed"
            );
            break;
        }
    }

    state.set(ConnectionState::Draining);
    closer.close();
    registration.unregister().await;
    sink.close().await;
    state.set(ConnectionState::Closed);

    debug!(
        connection_id = %registration.id(),
        channel = %registration.channel(),
        "connection closed"
    );
}

/// A registered connection whose read and write tasks are running
pub struct ActiveConnection {
    id: ConnectionId,
    channel: ChannelName,
    closer: Closer,
    state: StateCell,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl ActiveConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Requests removal. Repeated calls are no-ops.
    pub fn close(&self) {
        if self.closer.close() {
            debug!(connection_id = %self.id, channel = %self.channel, "close requested");
        }
    }

    /// Resolves once teardown has started for any reason
    pub async fn closing(&self) {
        self.closer.closed().await
    }

    /// Waits for both tasks to finish
    pub async fn join(self) {
        let Self {
            id,
            read_task,
            write_task,
            ..
        } = self;

        for (task, name) in [(read_task, "read"), (write_task, "write")] {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(connection_id = %id, task = name, "connection task panicked");
                }
            }
        }
    }
}
