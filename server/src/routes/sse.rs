//! Server-Sent Events handlers: push transport.
//!
//! `GET /sse/get` opens the inbound event stream for a session; every
//! outbound envelope becomes one `data:` event. `POST /sse/put` carries one
//! client payload per request and must present the identity cookie issued by
//! the stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wire::TransportKind;

use crate::routes::identity;
use crate::services::endpoint::{Endpoint, Link};
use crate::services::handshake;
use crate::state::{AppState, Hub};

/// Owns the link receiver for one SSE response. Dropping it (client went
/// away, or the hub closed the link) detaches the endpoint and salvages
/// anything still buffered.
struct PushStream {
    hub: Hub,
    endpoint: Endpoint,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.outbound.close();
        let mut unsent = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            unsent.push(text);
        }
        self.hub.disconnect(&self.endpoint);
        self.hub.salvage(self.endpoint.id(), unsent);
        info!(id = %self.endpoint.id(), "sse: stream closed");
    }
}

fn event_stream(stream: PushStream) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures::stream::unfold(stream, |mut stream| async move {
        let text = stream.outbound.recv().await?;
        Some((Ok(SseEvent::default().data(text)), stream))
    })
}

pub async fn get(State(state): State<AppState>, jar: CookieJar) -> Response {
    let hub = state.hub;
    let (tx, outbound) = mpsc::unbounded_channel();
    let presented = identity::presented(&jar, hub.config());
    let attached = handshake::attach(&hub, presented.as_deref(), TransportKind::ServerPush, Link::Push(tx));
    let endpoint = attached.endpoint;
    info!(id = %endpoint.id(), resumed = attached.resumed, "sse: client connected");

    let jar = identity::remember(jar, hub.config(), endpoint.id());
    let stream = event_stream(PushStream { hub, endpoint, outbound });
    (jar, Sse::new(stream).keep_alive(KeepAlive::default())).into_response()
}

pub async fn put(State(state): State<AppState>, jar: CookieJar, body: String) -> Response {
    let hub = state.hub;
    let Some(id) = identity::presented(&jar, hub.config()) else {
        warn!("sse: put without identity");
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(endpoint) = hub.clients().get_client(&id) else {
        warn!(%id, "sse: put for unknown identity");
        return (identity::forget(jar, hub.config()), StatusCode::NOT_FOUND).into_response();
    };
    debug!(%id, bytes = body.len(), "sse: put");
    endpoint.receive(&hub, body);
    StatusCode::NO_CONTENT.into_response()
}
