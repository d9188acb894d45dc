//! Shared application state.
//!
//! DESIGN
//! ======
//! `Hub` is the one context object for the relay: it owns the client
//! registry, the channel registry and the configuration. It is created once
//! at startup and cloned (an `Arc` bump) into every route handler and timer
//! task. Nothing in the relay reaches for process globals.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use wire::{Envelope, Event, EventKind, Fault, Payload};

use crate::config::Config;
use crate::services::channel::ChannelRegistry;
use crate::services::endpoint::Endpoint;
use crate::services::handshake::Phase;
use crate::services::registry::ClientRegistry;

// =============================================================================
// HUB
// =============================================================================

struct HubInner {
    clients: ClientRegistry,
    channels: ChannelRegistry,
    config: Config,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Self {
            inner: Arc::new(HubInner {
                clients: ClientRegistry::new(),
                channels: ChannelRegistry::new(config.drop_empty_channels),
                config,
            }),
        };
        hub.clients().on(EventKind::Error, Arc::new(reject_protocol_violation));
        hub
    }

    #[must_use]
    pub fn clients(&self) -> &ClientRegistry {
        &self.inner.clients
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Explicit close: unregister (if still current), leave every channel,
    /// drop the link and emit `close`.
    pub fn close_endpoint(&self, endpoint: &Endpoint) {
        endpoint.cancel_expiry();
        let current = self.clients().remove_if_current(endpoint);
        if current {
            self.channels().leave_all(endpoint);
        }
        endpoint.set_phase(Phase::Closed);
        endpoint.close_link();
        if current {
            info!(id = %endpoint.id(), clients = self.clients().len(), "hub: client closed");
            endpoint.emit(self, &Event::Close);
        }
    }

    /// The physical connection went away. The endpoint stays registered for
    /// the detach grace period so the session can reconnect.
    pub fn disconnect(&self, endpoint: &Endpoint) {
        if !endpoint.close_link() {
            return;
        }
        if !self.is_current(endpoint) {
            debug!(id = %endpoint.id(), "hub: replaced link disconnected");
            return;
        }
        let grace = self.config().detach_grace;
        if grace.is_zero() {
            self.close_endpoint(endpoint);
        } else {
            debug!(id = %endpoint.id(), grace_ms = grace.as_millis(), "hub: client detached");
            self.schedule_expiry(endpoint, grace);
        }
    }

    /// Close the endpoint after `ttl` unless rescheduled or adopted first.
    pub fn schedule_expiry(&self, endpoint: &Endpoint, ttl: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.close_endpoint(endpoint);
            return;
        };
        let hub = self.clone();
        let target = endpoint.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            info!(id = %target.id(), "hub: endpoint expired");
            hub.close_endpoint(&target);
        });
        endpoint.set_expiry(handle);
    }

    fn is_current(&self, endpoint: &Endpoint) -> bool {
        self.clients()
            .get_client(endpoint.id())
            .is_some_and(|current| current.same(endpoint))
    }

    pub fn publish(&self, channel: &str, payload: impl Into<Payload>) -> usize {
        self.channels().publish(self.clients(), channel, payload)
    }

    pub fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        self.clients().broadcast(payload)
    }

    /// Close every member of a channel, then forget the channel.
    pub fn terminate(&self, channel: &str) {
        let members = self.channels().terminate(channel);
        info!(channel, members = members.len(), "hub: channel terminated");
        for id in members {
            if let Some(endpoint) = self.clients().get_client(&id) {
                self.close_endpoint(&endpoint);
            }
        }
    }

    /// Requeue wire strings that never left a dying link onto whatever
    /// endpoint the session has now.
    pub fn salvage(&self, id: &str, texts: Vec<String>) {
        if texts.is_empty() {
            return;
        }
        let Some(endpoint) = self.clients().get_client(id) else {
            debug!(%id, dropped = texts.len(), "hub: nothing to salvage into");
            return;
        };
        debug!(%id, salvaged = texts.len(), "hub: salvaged unsent messages");
        endpoint.requeue_front(texts);
        endpoint.drain();
    }

    /// Close every endpoint and forget every channel.
    pub fn shutdown(&self) {
        let endpoints = self.clients().clear();
        info!(clients = endpoints.len(), "hub: shutting down");
        for endpoint in endpoints {
            endpoint.cancel_expiry();
            endpoint.set_phase(Phase::Closed);
            endpoint.close_link();
        }
        self.channels().clear();
    }
}

/// Registry-level error observer: a protocol violation gets a 400 and the
/// offending endpoint is closed. Transport faults are left to reconnection.
fn reject_protocol_violation(hub: &Hub, endpoint: &Endpoint, event: &Event) {
    if let Event::Error(Fault::Protocol(reason)) = event {
        warn!(id = %endpoint.id(), %reason, "hub: protocol violation, closing client");
        endpoint.send(Envelope::error(400, "Invalid Json"));
        hub.close_endpoint(endpoint);
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
}

impl AppState {
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
