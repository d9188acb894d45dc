//! Server-sent events inbound, one POST per outbound payload.

use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Method;
use tracing::debug;
use wire::Event;

use super::{Connector, Core, Writer, pump};
use crate::error::ClientError;

pub struct ServerPush {
    pub(crate) core: Arc<Core>,
    connector: Connector,
}

impl ServerPush {
    pub(crate) fn new(core: Arc<Core>, connector: Connector) -> Self {
        Self { core, connector }
    }

    pub(crate) fn start(&self) {
        self.core.set_connecting();
        let task = tokio::spawn(run(Arc::clone(&self.core), self.connector.clone()));
        self.core.track(task);
    }
}

async fn run(core: Arc<Core>, connector: Connector) {
    let response = match connector.fetch(Method::GET, &connector.endpoints.push_get, None).await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "sse: connect failed");
            core.fail(e.into());
            return;
        }
    };
    if !core.open() {
        return;
    }
    let writer = Writer::Http { connector: connector.clone(), url: connector.endpoints.push_put.clone() };
    core.track(tokio::spawn(pump(Arc::clone(&core), writer)));

    let mut events = response.bytes_stream().eventsource();
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => core.emit(&Event::Data(wire::decode(event.data))),
            Err(e) => {
                debug!(error = %e, "sse: stream failed");
                core.fail(ClientError::EventStream(e.to_string()).into());
                return;
            }
        }
    }
    debug!("sse: stream ended");
    core.closed();
}
