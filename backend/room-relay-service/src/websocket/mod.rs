pub mod router;
pub mod session;

pub use router::{Envelope, EventContext, EventHandler, EventRouter, PresenceHandler};
pub use session::{run_session, SessionSettings, SessionSink};

use crate::error::AppError;
use actix_web::{HttpMessage, HttpRequest};
use room_hub::{ChannelContext, ChannelName};

/// Resolves the room named in the request path and stores it in the request
/// extensions as a [`ChannelContext`].
pub fn attach_room(req: &HttpRequest) -> Result<ChannelName, AppError> {
    let raw = req
        .match_info()
        .get("room")
        .ok_or_else(|| AppError::BadRequest("no room in request path".into()))?;
    let room = ChannelName::new(raw)?;

    let ctx = ChannelContext::new().attach_channel(room.clone());
    req.extensions_mut().insert(ctx);
    Ok(room)
}

/// The context stored by [`attach_room`]; empty when nothing was attached
pub fn room_context(req: &HttpRequest) -> ChannelContext {
    req.extensions()
        .get::<ChannelContext>()
        .cloned()
        .unwrap_or_default()
}
