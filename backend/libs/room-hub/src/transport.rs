//! Byte-stream seam between the core and whatever carries frames to clients.
//!
//! A connection is a [`FrameSource`] (inbound frames) plus a [`FrameSink`]
//! (outbound frames). Each frame is one opaque payload; the core does no
//! parsing of its own.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next inbound frame, or `None` once the remote side has closed
    async fn recv_frame(&mut self) -> Option<Result<Bytes, TransportError>>;
}

#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Closes the outbound direction. Must tolerate repeated calls.
    async fn close(&mut self);
}

/// Frame source fed by a bounded channel.
///
/// Adapters for runtimes whose streams cannot leave their task (actix
/// websockets) pump frames into the sending half and hand this to the core.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Bytes, TransportError>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, TransportError>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv_frame(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.rx.recv().await
    }
}

/// Frame sink writing into a bounded channel; closing drops the sender.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(payload).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx.take();
    }
}

/// The remote end of an in-memory transport: plays the client.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<Result<Bytes, TransportError>>>,
    outbound: mpsc::Receiver<Bytes>,
}

impl MemoryPeer {
    /// Sends a frame to the server side. Returns false once the source is gone.
    pub async fn send(&self, payload: impl Into<Bytes>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(payload.into())).await.is_ok(),
            None => false,
        }
    }

    /// Injects a read failure on the server side
    pub async fn fail(&self, error: TransportError) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Err(error)).await.is_ok(),
            None => false,
        }
    }

    /// Closes the client-to-server direction, as a remote close would
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }

    /// Next frame written by the server, `None` after the server closed the sink
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }
}

/// Builds an in-memory transport with `capacity` frames of buffering per direction.
pub fn memory_transport(capacity: usize) -> (ChannelSource, ChannelSink, MemoryPeer) {
    let capacity = capacity.max(1);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);

    (
        ChannelSource::new(in_rx),
        ChannelSink::new(out_tx),
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_carries_frames_both_ways() {
        let (mut source, mut sink, mut peer) = memory_transport(4);

        assert!(peer.send("ping").await);
        assert_eq!(
            source.recv_frame().await,
            Some(Ok(Bytes::from_static(b"ping")))
        );

        sink.send_frame(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn test_hang_up_ends_source() {
        let (mut source, _sink, mut peer) = memory_transport(4);
        peer.hang_up();
        assert_eq!(source.recv_frame().await, None);
        assert!(!peer.send("late").await);
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_writes_and_ends_peer_stream() {
        let (_source, mut sink, mut peer) = memory_transport(4);
        sink.close().await;
        sink.close().await;

        assert_eq!(
            sink.send_frame(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        );
        assert_eq!(peer.recv().await, None);
    }
}
