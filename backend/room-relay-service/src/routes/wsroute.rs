use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::websocket::{attach_room, room_context, run_session, SessionSettings};
use actix_web::{get, web, HttpRequest, HttpResponse};
use tracing::debug;

/// Upgrades to a websocket joined to the room named in the path
#[get("/rooms/{room}/ws")]
pub async fn room_ws(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    attach_room(&req)?;
    let ctx = room_context(&req);
    // Rejected here so a request without a room never reaches the hub
    let room = ctx.require_channel()?.clone();

    let (response, session, msg_stream) =
        actix_ws::handle(&req, body).map_err(|e| AppError::BadRequest(e.to_string()))?;

    debug!(room = %room, "websocket upgrade accepted");

    let settings = SessionSettings {
        connector: state.connector.clone(),
        router: state.router.clone(),
        idle_timeout: state.config.idle_timeout,
        outbound_frames: state.config.outbound_frames,
    };
    actix_web::rt::spawn(run_session(settings, ctx, session, msg_stream));

    Ok(response)
}
