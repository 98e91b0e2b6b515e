use crate::error::AppResult;
use crate::state::AppState;
use crate::websocket::attach_room;
use actix_web::{get, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

/// Local head count of one room on this instance
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub room: String,
    pub connections: usize,
}

#[get("/rooms")]
pub async fn list_rooms(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let rooms: Vec<Presence> = state
        .connector
        .backend()
        .hub()
        .channels()
        .await?
        .into_iter()
        .map(|(room, connections)| Presence {
            room: room.to_string(),
            connections,
        })
        .collect();

    Ok(HttpResponse::Ok().json(rooms))
}

#[get("/rooms/{room}")]
pub async fn room_presence(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let room = attach_room(&req)?;
    let connections = state
        .connector
        .backend()
        .hub()
        .channel_size(&room)
        .await?;

    Ok(HttpResponse::Ok().json(Presence {
        room: room.to_string(),
        connections,
    }))
}
