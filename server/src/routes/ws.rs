//! WebSocket handler: duplex transport.
//!
//! DESIGN
//! ======
//! The session is attached before the upgrade completes so the identity
//! cookie can ride on the 101 response. Outbound traffic for the endpoint
//! arrives on a per-connection unbounded channel; the connection task runs a
//! `select!` loop between that channel and the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `IDENTITY` + `AUTH_REQ` (new session) or resume (known id)
//! 2. Inbound frames → `Endpoint::receive` → handshake / registry handlers
//! 3. Link closed by the hub → send close frame, exit
//! 4. Socket closed or failed → detach, salvage unsent frames

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wire::TransportKind;

use crate::routes::identity;
use crate::services::endpoint::{Endpoint, Link};
use crate::services::handshake;
use crate::state::{AppState, Hub};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, jar: CookieJar, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub;
    let (tx, rx) = mpsc::unbounded_channel();
    let presented = identity::presented(&jar, hub.config());
    let attached = handshake::attach(&hub, presented.as_deref(), TransportKind::Duplex, Link::Duplex(tx));
    let endpoint = attached.endpoint;
    let jar = identity::remember(jar, hub.config(), endpoint.id());

    let on_failure = {
        let hub = hub.clone();
        let endpoint = endpoint.clone();
        move |error: axum::Error| {
            warn!(id = %endpoint.id(), error = %error, "ws: upgrade failed");
            hub.disconnect(&endpoint);
        }
    };
    let upgrade = ws
        .on_failed_upgrade(on_failure)
        .on_upgrade(move |socket| run_ws(socket, hub, endpoint, rx));

    (jar, upgrade).into_response()
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, hub: Hub, endpoint: Endpoint, mut outbound: mpsc::UnboundedReceiver<String>) {
    let id = endpoint.id().to_owned();
    info!(%id, "ws: client connected");

    // Frames taken off the link that never made it onto the socket.
    let mut unsent = Vec::new();
    let mut closed_by_hub = false;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => endpoint.receive(&hub, text.as_str()),
                    Message::Binary(bytes) => endpoint.receive(&hub, bytes.to_vec()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            next = outbound.recv() => {
                let Some(text) = next else {
                    closed_by_hub = true;
                    break;
                };
                if let Err(e) = socket.send(Message::Text(text.clone().into())).await {
                    debug!(%id, error = %e, "ws: send failed");
                    unsent.push(text);
                    break;
                }
            }
        }
    }

    if closed_by_hub {
        let _ = socket.send(Message::Close(None)).await;
    }

    outbound.close();
    while let Ok(text) = outbound.try_recv() {
        unsent.push(text);
    }
    hub.disconnect(&endpoint);
    hub.salvage(&id, unsent);
    info!(%id, closed_by_hub, "ws: client disconnected");
}
