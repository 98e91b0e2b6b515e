//! Bridges one actix websocket to the room core.
//!
//! `MessageStream` cannot leave the actix worker it was created on, so frames
//! are pumped here into a [`ChannelSource`] while the core's tasks write back
//! through [`SessionSink`].

use super::router::{EventContext, EventRouter};
use crate::config::OutboundFrames;
use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use room_hub::{ChannelContext, ChannelSource, Connector, FrameSink, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Frames read from the socket but not yet taken by the core
const INBOUND_BUFFER: usize = 64;

/// Writes core frames to the websocket, framed per [`OutboundFrames`]
pub struct SessionSink {
    session: Option<Session>,
    frames: OutboundFrames,
}

impl SessionSink {
    pub fn new(session: Session, frames: OutboundFrames) -> Self {
        Self {
            session: Some(session),
            frames,
        }
    }
}

#[async_trait]
impl FrameSink for SessionSink {
    async fn send_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::Closed)?;

        let sent = match self.frames.as_text(&payload) {
            Some(text) => session.text(text.to_owned()).await,
            None => session.binary(payload).await,
        };
        sent.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.close(None).await;
        }
    }
}

/// Everything a websocket session needs besides the socket itself
#[derive(Clone)]
pub struct SessionSettings {
    pub connector: Connector,
    pub router: Arc<EventRouter>,
    pub idle_timeout: Option<Duration>,
    pub outbound_frames: OutboundFrames,
}

/// Registers the socket with the core and pumps inbound frames until either
/// side goes away
pub async fn run_session(
    settings: SessionSettings,
    ctx: ChannelContext,
    mut session: Session,
    mut msg_stream: MessageStream,
) {
    let (inbound, rx) = mpsc::channel(INBOUND_BUFFER);
    let sink = SessionSink::new(session.clone(), settings.outbound_frames);

    let connection = match settings
        .connector
        .connect(&ctx, ChannelSource::new(rx), sink)
        .await
    {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "websocket rejected by hub");
            return;
        }
    };

    let room = connection.channel().clone();
    let connection_id = connection.id();
    info!(connection_id = %connection_id, room = %room, "websocket joined room");

    let mut last_seen = Instant::now();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = connection.closing() => break,

            _ = heartbeat.tick() => {
                if let Some(timeout) = settings.idle_timeout {
                    if last_seen.elapsed() > timeout {
                        info!(connection_id = %connection_id, room = %room, "websocket idle, disconnecting");
                        break;
                    }
                }
                if session.ping(b"").await.is_err() {
                    break;
                }
            }

            msg = msg_stream.next() => {
                let Some(msg) = msg else {
                    break;
                };
                last_seen = Instant::now();

                let frame = match msg {
                    Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Ping(bytes)) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(connection_id = %connection_id, reason = ?reason, "client closed websocket");
                        break;
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Continuation(_)) | Ok(Message::Nop) => continue,
                    Err(e) => {
                        let _ = inbound.send(Err(TransportError::Io(e.to_string()))).await;
                        break;
                    }
                };

                if let Some((handler, envelope)) = settings.router.route(&frame) {
                    let ctx = EventContext {
                        room: room.clone(),
                        payload: envelope.payload,
                        backend: Arc::clone(settings.connector.backend()),
                    };
                    if let Err(e) = handler.handle(ctx).await {
                        warn!(connection_id = %connection_id, event = %envelope.event_type, error = %e, "event handler failed");
                    }
                    continue;
                }

                if inbound.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    // Ends the core's read task, which tears the connection down
    drop(inbound);
    connection.close();
    connection.join().await;

    info!(connection_id = %connection_id, room = %room, "websocket left room");
}
