use actix_web::{web, App, HttpServer};
use room_hub::{build_backend, Connector};
use room_relay_service::{
    config::Config, error::AppError, logging, routes, state::AppState, websocket::EventRouter,
};
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let cfg = Arc::new(Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    let backend = build_backend(&cfg.backend_settings())
        .await
        .map_err(|e| AppError::StartServer(format!("backend: {e}")))?;
    info!(backend = %backend.kind(), "room backend ready");

    let connector = Connector::new(backend).with_outbound_capacity(cfg.outbound_queue_capacity);
    let router = Arc::new(EventRouter::with_defaults()?);

    let state = AppState {
        connector,
        config: Arc::clone(&cfg),
        router,
    };

    let bind_addr = (cfg.host.clone(), cfg.port);
    info!(host = %cfg.host, port = cfg.port, "starting room relay");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(e.to_string()))
}
