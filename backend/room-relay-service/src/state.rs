use crate::{config::Config, websocket::EventRouter};
use room_hub::Connector;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub connector: Connector,
    pub config: Arc<Config>,
    /// Named JSON events handled by the service instead of being fanned out
    pub router: Arc<EventRouter>,
}
