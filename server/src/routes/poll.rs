//! Long-polling handlers: pull transport.
//!
//! There is no connection to hold open: the endpoint's backlog is the
//! mailbox. `GET /poll/get` empties it into a JSON array, `POST /poll/put`
//! delivers one payload. Either request refreshes the idle TTL; a session
//! that stops polling expires.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;
use tracing::debug;
use wire::TransportKind;

use crate::routes::identity;
use crate::services::endpoint::{Endpoint, Link};
use crate::services::handshake;
use crate::state::{AppState, Hub};

/// The session's poll endpoint, attaching one if the caller has none.
fn poll_endpoint(hub: &Hub, jar: CookieJar) -> (Endpoint, CookieJar) {
    let presented = identity::presented(&jar, hub.config());
    let existing = presented
        .as_deref()
        .and_then(|id| hub.clients().get_client(id))
        .filter(|endpoint| endpoint.kind() == TransportKind::Poll && endpoint.is_attached());

    let endpoint = existing.unwrap_or_else(|| {
        let attached = handshake::attach(hub, presented.as_deref(), TransportKind::Poll, Link::Poll);
        debug!(id = %attached.endpoint.id(), resumed = attached.resumed, "poll: session attached");
        attached.endpoint
    });
    hub.schedule_expiry(&endpoint, hub.config().poll_idle_ttl);
    let jar = identity::remember(jar, hub.config(), endpoint.id());
    (endpoint, jar)
}

pub async fn get(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (endpoint, jar) = poll_endpoint(&state.hub, jar);
    let batch: Vec<Value> = endpoint
        .take_backlog()
        .into_iter()
        .map(|text| serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text)))
        .collect();
    debug!(id = %endpoint.id(), count = batch.len(), "poll: get");
    (jar, Json(batch)).into_response()
}

pub async fn put(State(state): State<AppState>, jar: CookieJar, body: String) -> Response {
    let (endpoint, jar) = poll_endpoint(&state.hub, jar);
    debug!(id = %endpoint.id(), bytes = body.len(), "poll: put");
    endpoint.receive(&state.hub, body);
    (jar, StatusCode::NO_CONTENT).into_response()
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
