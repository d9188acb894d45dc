//! Periodic pull transport. No connection is held between requests.
//!
//! The first pull runs as soon as the transport starts so the relay can issue
//! an identity before any POST goes out; the transport opens once that pull
//! succeeds. Later pulls run on a fixed interval.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;
use wire::{Decoded, Event};

use super::{Connector, Core, Writer, pump};
use crate::error::ClientError;

pub struct Poll {
    pub(crate) core: Arc<Core>,
    connector: Connector,
}

impl Poll {
    pub(crate) fn new(core: Arc<Core>, connector: Connector) -> Self {
        Self { core, connector }
    }

    pub(crate) fn start(&self) {
        self.core.set_connecting();
        let task = tokio::spawn(run(Arc::clone(&self.core), self.connector.clone()));
        self.core.track(task);
    }
}

/// Split a pull response into individual data events. An array yields one
/// event per element, anything else yields one event, an empty body none.
pub(crate) fn split_batch(body: &str) -> Vec<Decoded> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items.into_iter().map(wire::decode).collect(),
        Ok(value) => vec![wire::decode(value)],
        Err(_) if body.trim().is_empty() => Vec::new(),
        Err(_) => vec![wire::decode(body)],
    }
}

async fn pull(connector: &Connector) -> Result<Vec<Decoded>, ClientError> {
    let response = connector.fetch(Method::GET, &connector.endpoints.poll_get, None).await?;
    let body = response.text().await?;
    Ok(split_batch(&body))
}

fn deliver(core: &Core, batch: Vec<Decoded>) {
    for decoded in batch {
        core.emit(&Event::Data(decoded));
    }
}

async fn run(core: Arc<Core>, connector: Connector) {
    let first = match pull(&connector).await {
        Ok(batch) => batch,
        Err(e) => {
            debug!(error = %e, "poll: first pull failed");
            core.fail(e.into());
            return;
        }
    };
    if !core.open() {
        return;
    }
    let writer = Writer::Http { connector: connector.clone(), url: connector.endpoints.poll_put.clone() };
    core.track(tokio::spawn(pump(Arc::clone(&core), writer)));
    deliver(&core, first);

    let period = connector.poll_interval;
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        match pull(&connector).await {
            Ok(batch) => deliver(&core, batch),
            Err(e) => {
                debug!(error = %e, "poll: pull failed");
                core.fail(e.into());
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
