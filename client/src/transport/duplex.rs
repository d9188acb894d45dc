//! WebSocket transport: one long-lived bidirectional connection.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE};
use tracing::debug;
use wire::Event;

use super::{Connector, Core, Writer, WsStream, pump};
use crate::error::ClientError;

pub struct Duplex {
    pub(crate) core: Arc<Core>,
    connector: Connector,
}

impl Duplex {
    pub(crate) fn new(core: Arc<Core>, connector: Connector) -> Self {
        Self { core, connector }
    }

    pub(crate) fn start(&self) {
        self.core.set_connecting();
        let task = tokio::spawn(run(Arc::clone(&self.core), self.connector.clone()));
        self.core.track(task);
    }
}

async fn connect(connector: &Connector) -> Result<WsStream, ClientError> {
    let mut request = connector.endpoints.ws.as_str().into_client_request()?;
    if let Some(cookie) = connector.cookie() {
        let value = HeaderValue::from_str(&cookie).map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(COOKIE, value);
    }
    let (stream, response) = connect_async(request).await?;
    connector.absorb(response.headers().get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()));
    Ok(stream)
}

async fn run(core: Arc<Core>, connector: Connector) {
    let stream = match connect(&connector).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(error = %e, "ws: connect failed");
            core.fail(e.into());
            return;
        }
    };
    let (sink, mut inbound) = stream.split();
    if !core.open() {
        return;
    }
    core.track(tokio::spawn(pump(Arc::clone(&core), Writer::Ws(sink))));

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => core.emit(&Event::Data(wire::decode(text.as_str()))),
            Ok(Message::Binary(bytes)) => core.emit(&Event::Data(wire::decode(bytes.to_vec()))),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "ws: read failed");
                core.fail(ClientError::from(e).into());
                return;
            }
        }
    }
    debug!("ws: closed by server");
    core.closed();
}
