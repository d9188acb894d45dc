//! Periodic heartbeat broadcast.
//!
//! Every interval the relay broadcasts `{type: heartbeat, value: "Pong"}` to
//! all registered endpoints. The first beat fires one full interval after
//! start. Broadcasting never waits on a slow endpoint: a failed write just
//! lands in that endpoint's backlog.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;
use wire::Envelope;

use crate::state::Hub;

/// Spawn the heartbeat task. Abort the handle to stop it.
#[must_use]
pub fn spawn_heartbeat(hub: Hub, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let delivered = hub.broadcast(Envelope::heartbeat());
            debug!(delivered, clients = hub.clients().len(), "heartbeat: sent");
        }
    })
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
