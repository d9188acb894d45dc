//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One axum router exposes the three transports side by side. A client may
//! start on any of them and fall back to the next; the identity cookie ties
//! the connections of one session together.

pub mod identity;
pub mod poll;
pub mod sse;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the relay router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/realtime/ws", get(ws::handle_ws))
        .route("/sse/get", get(sse::get))
        .route("/sse/put", post(sse::put))
        .route("/poll/get", get(poll::get))
        .route("/poll/put", post(poll::put))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
