//! Public HTTP surface: a thin axum router mapping the endpoints of spec §6
//! onto `Broker` calls. Routing, CORS, and request tracing follow the same
//! tower-http layering style as the teacher's service shell.

pub mod dto;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;

pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", get(handlers::info))
        .route("/generate/sync", post(handlers::generate_sync))
        .route("/generate/async", post(handlers::generate_async))
        .route("/generate/prompt/{id}", get(handlers::prompt_status))
        .route("/generate/pop", post(handlers::pop))
        .route("/generate/submit", post(handlers::submit))
        .route("/servers", get(handlers::servers))
        .route("/servers/{id}", get(handlers::server_by_id))
        .route("/models", get(handlers::models))
        .route("/usage", get(handlers::usage))
        .route("/contributions", get(handlers::contributions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(broker)
}
