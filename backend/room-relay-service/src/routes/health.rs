use crate::state::AppState;
use actix_web::{get, web, HttpResponse, Responder};
use room_hub::{BackendKind, HubStats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub stats: HubStats,
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

#[get("/stats")]
pub async fn stats(state: web::Data<AppState>) -> impl Responder {
    let backend = state.connector.backend();
    HttpResponse::Ok().json(StatsResponse {
        backend: backend.kind(),
        stats: backend.hub().stats(),
    })
}
