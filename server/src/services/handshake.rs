//! Connection handshake and control-message handling.
//!
//! LIFECYCLE
//! =========
//! `NEW -> AUTHENTICATING -> ACTIVE -> CLOSED`, per endpoint.
//!
//! 1. First contact: allocate an identity, send `IDENTITY` then `AUTH_REQ`.
//!    With the auth handshake disabled the endpoint goes straight to ACTIVE.
//! 2. `AUTH_RES`: subscribe to the channel it names, go ACTIVE, ack `SUCCESS`.
//! 3. ACTIVE endpoints may `SUBSCRIBE` / `UNSUBSCRIBE` and publish `MESSAGE`s
//!    that carry a channel.
//! 4. A reconnect presenting a known identity replaces the registry entry and
//!    resumes where the previous connection left off.
//!
//! The auth value is opaque here; checking credentials is someone else's job.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;
use wire::{Envelope, Event, EventKind, MessageType, TransportKind};

use crate::services::endpoint::{Endpoint, Link};
use crate::state::Hub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Authenticating,
    Active,
    Closed,
}

/// Result of attaching a physical connection to a session.
pub struct Attached {
    pub endpoint: Endpoint,
    /// `true` when a known identity was resumed.
    pub resumed: bool,
}

/// Attach a new physical connection. Resumes the presented identity when the
/// registry knows it, otherwise starts a fresh session under a new identity.
pub fn attach(hub: &Hub, presented: Option<&str>, kind: TransportKind, link: Link) -> Attached {
    if let Some(id) = presented.filter(|id| !id.is_empty()) {
        let endpoint = Endpoint::new(id, kind, link.clone());
        if let Some(old) = hub.clients().replace_client(id, endpoint.clone(), true) {
            resume(&endpoint, &old);
            return Attached { endpoint, resumed: true };
        }
        debug!(presented = id, "handshake: unknown identity, starting fresh");
    }

    let endpoint = Endpoint::new(Uuid::new_v4().to_string(), kind, link);
    endpoint.on(EventKind::Data, Arc::new(control));
    hub.clients().push(endpoint.clone());
    greet(hub, &endpoint);
    Attached { endpoint, resumed: false }
}

fn greet(hub: &Hub, endpoint: &Endpoint) {
    endpoint.send(Envelope::identity(endpoint.id()));
    if hub.config().auth_handshake {
        endpoint.set_phase(Phase::Authenticating);
        endpoint.send(Envelope::auth_request());
    } else {
        endpoint.set_phase(Phase::Active);
    }
    info!(id = %endpoint.id(), kind = ?endpoint.kind(), phase = ?endpoint.phase(), "handshake: new session");
}

fn resume(endpoint: &Endpoint, old: &Endpoint) {
    if endpoint.phase() == Phase::Authenticating {
        // The previous connection may have died before AUTH_REQ got out.
        endpoint.send(Envelope::auth_request());
    }
    let drained = endpoint.drain();
    info!(
        id = %endpoint.id(),
        from = ?old.kind(),
        to = ?endpoint.kind(),
        phase = ?endpoint.phase(),
        drained,
        "handshake: session resumed"
    );
}

/// Data handler installed on every new session. Adopted by later endpoints
/// of the same session along with the rest of its handlers.
fn control(hub: &Hub, endpoint: &Endpoint, event: &Event) {
    let Some(envelope) = event.envelope() else { return };
    let phase = endpoint.phase();

    match &envelope.kind {
        MessageType::AuthRes => {
            if phase != Phase::Authenticating {
                debug!(id = %endpoint.id(), ?phase, "handshake: ignoring AUTH_RES");
                return;
            }
            let channel = envelope.target_channel();
            if let Some(name) = channel {
                hub.channels().subscribe(endpoint, name);
            }
            endpoint.set_phase(Phase::Active);
            endpoint.send(ack(channel));
            info!(id = %endpoint.id(), channel, "handshake: authenticated");
        }
        MessageType::Subscribe | MessageType::Unsubscribe => {
            if phase != Phase::Active {
                warn!(id = %endpoint.id(), ?phase, kind = %envelope.kind, "handshake: membership change before auth");
                endpoint.send(Envelope::error(401, "Unauthenticated"));
                return;
            }
            let Some(name) = envelope.target_channel() else {
                endpoint.send(Envelope::error(400, "Missing channel"));
                return;
            };
            if envelope.kind == MessageType::Subscribe {
                hub.channels().subscribe(endpoint, name);
            } else {
                hub.channels().unsubscribe(endpoint, name);
            }
            endpoint.send(ack(Some(name)));
        }
        MessageType::Ping => {
            endpoint.send(Envelope::pong());
        }
        MessageType::CloseSocket => {
            info!(id = %endpoint.id(), "handshake: close requested by client");
            hub.close_endpoint(endpoint);
        }
        MessageType::Message if phase == Phase::Active => {
            if let Some(name) = envelope.channel.as_deref() {
                let delivered = hub.publish(name, envelope.clone());
                debug!(id = %endpoint.id(), channel = name, delivered, "handshake: relayed message");
            }
        }
        _ => {}
    }
}

fn ack(channel: Option<&str>) -> Envelope {
    match channel {
        Some(name) => Envelope::success(name),
        None => Envelope::new(MessageType::Success),
    }
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod tests;
