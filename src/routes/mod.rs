//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the chat API surface: the streaming turn endpoint,
//! the local model health probe, and a bare liveness check. CORS is wide
//! open because an authenticating gateway fronts this service.

pub mod auth;
pub mod chat;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the service router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Bodies up to four times the envelope cap are still buffered so the
    // handler can answer with the JSON 413 envelope; anything larger is cut
    // at the transport.
    let transport_cap = state.limits.body_max_bytes.saturating_mul(4);

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/health/local-model", get(chat::local_model_health))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(transport_cap))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
