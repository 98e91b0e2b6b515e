pub mod health;
pub mod rooms;
pub mod wsroute;

use actix_web::web;

/// Mounts every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health)
        .service(health::stats)
        .service(rooms::list_rooms)
        .service(wsroute::room_ws)
        .service(rooms::room_presence);
}
