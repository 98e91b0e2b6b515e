//! Named JSON events handled by the service.
//!
//! A text frame shaped like `{"type": "<name>", "payload": ...}` whose name is
//! registered here is consumed by its handler. Anything else goes to the room
//! untouched.

use crate::error::AppError;
use async_trait::async_trait;
use room_hub::{Backend, ChannelName, HubError, Message};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Parses `frame` as an envelope; cheap rejection for frames that cannot be one
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let first = frame.iter().find(|b| !b.is_ascii_whitespace())?;
        if *first != b'{' {
            return None;
        }
        serde_json::from_slice(frame).ok()
    }
}

/// What a handler gets to work with
pub struct EventContext {
    pub room: ChannelName,
    pub payload: Value,
    pub backend: Arc<dyn Backend>,
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: EventContext) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in events registered
    pub fn with_defaults() -> Result<Self, HubError> {
        let mut router = Self::new();
        router.on("presence", PresenceHandler)?;
        Ok(router)
    }

    /// Registers `handler` for `name`. Each name can be taken only once.
    pub fn on<H: EventHandler>(&mut self, name: &str, handler: H) -> Result<(), HubError> {
        if self.handlers.contains_key(name) {
            return Err(HubError::DuplicateRegistration(name.to_string()));
        }
        self.handlers.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// The handler for `frame`, if it is an envelope naming a registered event
    pub fn route(&self, frame: &[u8]) -> Option<(Arc<dyn EventHandler>, Envelope)> {
        let envelope = Envelope::parse(frame)?;
        let handler = self.handlers.get(&envelope.event_type)?;
        Some((Arc::clone(handler), envelope))
    }
}

/// Publishes the room's current local head count to the room
pub struct PresenceHandler;

#[async_trait]
impl EventHandler for PresenceHandler {
    async fn handle(&self, ctx: EventContext) -> Result<(), AppError> {
        let connections = ctx.backend.hub().channel_size(&ctx.room).await?;
        let event = json!({
            "type": "presence",
            "payload": {
                "room": ctx.room.as_str(),
                "connections": connections,
            }
        });

        ctx.backend
            .publish(Message::new(ctx.room, event.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_hub::{ConnectionHandle, LocalBackend};

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _ctx: EventContext) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut router = EventRouter::with_defaults().unwrap();
        router.on("typing", Noop).unwrap();

        let err = router.on("typing", Noop).unwrap_err();
        assert_eq!(err, HubError::DuplicateRegistration("typing".into()));
        assert!(router.on("presence", Noop).is_err());
    }

    #[test]
    fn test_route_matches_registered_envelopes_only() {
        let router = EventRouter::with_defaults().unwrap();

        assert!(router.route(br#"{"type":"presence"}"#).is_some());
        assert!(router.route(br#" {"type":"presence","payload":{}}"#).is_some());
        assert!(router.route(br#"{"type":"chat","payload":"hi"}"#).is_none());
        assert!(router.route(b"presence").is_none());
        assert!(router.route(b"{not json").is_none());
        assert!(router.route(b"").is_none());
    }

    #[tokio::test]
    async fn test_presence_publishes_head_count() {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::default());
        let room = ChannelName::new("lobby").unwrap();
        let (handle, mut outbound) = ConnectionHandle::new(room.clone(), 8);
        let _registration = backend.register(handle).await.unwrap();

        PresenceHandler
            .handle(EventContext {
                room: room.clone(),
                payload: Value::Null,
                backend: Arc::clone(&backend),
            })
            .await
            .unwrap();

        let message = outbound.recv().await.unwrap();
        let body: Value = serde_json::from_slice(message.payload()).unwrap();
        assert_eq!(body["type"], "presence");
        assert_eq!(body["payload"]["room"], "lobby");
        assert_eq!(body["payload"]["connections"], 1);
    }
}
