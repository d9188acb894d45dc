//! Client registry: session identity -> current endpoint.
//!
//! ARCHITECTURE
//! ============
//! Backed by a sharded `DashMap`, so operations on one identity are atomic
//! and different identities never wait on a single global lock. Reconnection
//! swaps the entry while holding that key's entry guard; the old physical
//! link is closed only after the guard is released.
//!
//! Every pushed endpoint forwards its data, error and close events to the
//! registry-level handler lists, which is where application code observes
//! traffic from all sessions at once.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use wire::{Event, EventKind, EventLists, Payload};

use crate::services::endpoint::{Endpoint, Handler};
use crate::state::Hub;

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Endpoint>,
    handlers: Mutex<EventLists<Handler>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_client(&self, id: &str) -> Option<Endpoint> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    /// Register a new endpoint and forward its data, error and close events to
    /// the registry-level handlers.
    pub fn push(&self, endpoint: Endpoint) {
        for kind in [EventKind::Data, EventKind::Error, EventKind::Close] {
            endpoint.on(kind, Arc::new(|hub: &Hub, source: &Endpoint, event: &Event| hub.clients().emit(hub, source, event)));
        }
        let id = endpoint.id().to_owned();
        if let Some(previous) = self.clients.insert(id.clone(), endpoint) {
            previous.close_link();
        }
        info!(%id, clients = self.clients.len(), "registry: client registered");
    }

    /// Swap the endpoint for an existing identity.
    ///
    /// The new endpoint adopts the old one's handlers, backlog, channel
    /// memberships and phase before it becomes visible. Returns the old
    /// endpoint, or `None` (leaving `new` unregistered) when the identity is
    /// unknown. With `close_old`, the old link is closed exactly once.
    pub fn replace_client(&self, id: &str, new: Endpoint, close_old: bool) -> Option<Endpoint> {
        let old = match self.clients.entry(id.to_owned()) {
            Entry::Occupied(mut entry) => {
                let old = entry.get().clone();
                new.adopt(&old);
                entry.insert(new);
                old
            }
            Entry::Vacant(_) => return None,
        };
        if close_old && old.close_link() {
            debug!(%id, "registry: closed replaced link");
        }
        info!(%id, "registry: client replaced");
        Some(old)
    }

    pub fn remove_client(&self, id: &str) -> Option<Endpoint> {
        self.clients.remove(id).map(|(_, endpoint)| endpoint)
    }

    /// Remove `endpoint` only if it is still the current entry for its identity.
    /// A removal that lost a race with a reconnect is a no-op.
    pub fn remove_if_current(&self, endpoint: &Endpoint) -> bool {
        self.clients
            .remove_if(endpoint.id(), |_, current| current.same(endpoint))
            .is_some()
    }

    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).push(kind, handler);
    }

    /// Run the registry-level handlers for an event raised by `source`.
    pub fn emit(&self, hub: &Hub, source: &Endpoint, event: &Event) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(event.kind());
        for handler in handlers {
            handler(hub, source, event);
        }
    }

    /// Send to every registered endpoint. Endpoints that cannot take the write
    /// queue it. Returns the number of immediate deliveries.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        let text = payload.into().into_wire();
        self.endpoints()
            .into_iter()
            .filter(|endpoint| endpoint.send(text.clone()))
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of the registered endpoints. No shard lock is held afterwards.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Remove every entry and return what was registered.
    pub fn clear(&self) -> Vec<Endpoint> {
        let endpoints = self.endpoints();
        for endpoint in &endpoints {
            self.remove_if_current(endpoint);
        }
        endpoints
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
