//! Channel registry: named publish/subscribe groups of session identities.
//!
//! Membership is keyed by identity, not by endpoint, so a session keeps its
//! subscriptions across reconnects without any bookkeeping here. Channels
//! are created lazily on first subscribe.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{debug, warn};
use wire::Payload;

use crate::services::endpoint::Endpoint;
use crate::services::registry::ClientRegistry;

pub struct ChannelRegistry {
    channels: DashMap<String, HashSet<String>>,
    drop_empty: bool,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(drop_empty: bool) -> Self {
        Self { channels: DashMap::new(), drop_empty }
    }

    /// Add the endpoint's session to a channel. Returns `true` if it was not
    /// already a member.
    pub fn subscribe(&self, endpoint: &Endpoint, name: &str) -> bool {
        let added = self
            .channels
            .entry(name.to_owned())
            .or_default()
            .insert(endpoint.id().to_owned());
        endpoint.join_channel(name);
        debug!(id = %endpoint.id(), channel = name, added, "channel: subscribe");
        added
    }

    /// Remove the endpoint's session from a channel. Unknown channels are
    /// logged and ignored.
    pub fn unsubscribe(&self, endpoint: &Endpoint, name: &str) -> bool {
        endpoint.leave_channel(name);
        if !self.channels.contains_key(name) {
            warn!(id = %endpoint.id(), channel = name, "channel: unsubscribe from unknown channel");
            return false;
        }
        let removed = self.remove_member(name, endpoint.id());
        debug!(id = %endpoint.id(), channel = name, removed, "channel: unsubscribe");
        removed
    }

    fn remove_member(&self, name: &str, id: &str) -> bool {
        let removed = self
            .channels
            .get_mut(name)
            .is_some_and(|mut members| members.remove(id));
        if self.drop_empty {
            self.channels.remove_if(name, |_, members| members.is_empty());
        }
        removed
    }

    /// Send to every member of a channel. An unknown channel falls back to a
    /// full registry broadcast. Returns the number of immediate deliveries.
    pub fn publish(&self, clients: &ClientRegistry, name: &str, payload: impl Into<Payload>) -> usize {
        let text = payload.into().into_wire();
        let Some(members) = self.members(name) else {
            warn!(channel = name, "channel: publish to unknown channel, broadcasting to all clients");
            return clients.broadcast(text);
        };
        members
            .iter()
            .filter_map(|id| clients.get_client(id))
            .filter(|endpoint| endpoint.send(text.clone()))
            .count()
    }

    /// Remove a channel regardless of the empty-channel policy and return its
    /// former members, so the caller can close them.
    pub fn terminate(&self, name: &str) -> Vec<String> {
        self.channels
            .remove(name)
            .map(|(_, members)| members.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop the endpoint's session from every channel it joined.
    pub fn leave_all(&self, endpoint: &Endpoint) {
        for name in endpoint.take_channels() {
            self.remove_member(&name, endpoint.id());
        }
    }

    #[must_use]
    pub fn members(&self, name: &str) -> Option<Vec<String>> {
        self.channels
            .get(name)
            .map(|members| members.iter().cloned().collect())
    }

    #[must_use]
    pub fn contains(&self, name: &str, id: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(|members| members.contains(id))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
