//! Client-side transports.
//!
//! DESIGN
//! ======
//! [`Transport`] is a closed tagged union over the three delivery mechanisms.
//! Every variant shares a [`Core`]: status, the four handler lists, the
//! backpressure queue and the set of background tasks. Variants differ only
//! in how they connect, how inbound data arrives, and how one queued string
//! is written.
//!
//! ORDERING
//! ========
//! Outbound data always goes through the backpressure queue. A single writer
//! task per transport takes the head of the queue, writes it, and removes it
//! only after the write succeeded. A failed write leaves the head in place,
//! so nothing is reordered or dropped when the session hands the queue to the
//! next transport.

mod duplex;
mod poll;
mod push;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, RequestBuilder, Url};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use wire::{ConnectionStatus, Event, EventKind, EventLists, Fault, TransportKind};

use crate::error::ClientError;
use crate::identity::{self, IdentityStore};

pub use duplex::Duplex;
pub use poll::Poll;
pub use push::ServerPush;

/// Callback registered on a transport or session.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// ENDPOINTS / CONNECTOR
// =============================================================================

/// The five relay URLs, derived from one HTTP base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ws: Url,
    pub push_get: Url,
    pub push_put: Url,
    pub poll_get: Url,
    pub poll_put: Url,
}

impl Endpoints {
    /// Derive every endpoint from an `http(s)://` base URL. The WebSocket URL
    /// switches to `ws(s)://`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] if the base does not parse or is
    /// not an HTTP URL.
    pub fn from_base(base: &str) -> Result<Self, ClientError> {
        let mut root = Url::parse(base).map_err(|e| ClientError::InvalidBaseUrl(format!("{base}: {e}")))?;
        let ws_scheme = match root.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ClientError::InvalidBaseUrl(format!("{base}: unsupported scheme {other}"))),
        };
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let join = |path: &str| root.join(path).map_err(|e| ClientError::InvalidBaseUrl(format!("{base}: {e}")));

        let mut ws = join("realtime/ws")?;
        ws.set_scheme(ws_scheme)
            .map_err(|()| ClientError::InvalidBaseUrl(format!("{base}: cannot derive websocket url")))?;

        Ok(Self {
            ws,
            push_get: join("sse/get")?,
            push_put: join("sse/put")?,
            poll_get: join("poll/get")?,
            poll_put: join("poll/put")?,
        })
    }
}

/// Everything a transport needs to reach the relay.
#[derive(Clone)]
pub struct Connector {
    pub(crate) http: reqwest::Client,
    pub(crate) endpoints: Endpoints,
    pub(crate) identity: Arc<dyn IdentityStore>,
    pub(crate) cookie_name: String,
    pub(crate) poll_interval: Duration,
}

impl Connector {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        identity: Arc<dyn IdentityStore>,
        cookie_name: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self { http, endpoints, identity, cookie_name: cookie_name.into(), poll_interval }
    }

    pub(crate) fn cookie(&self) -> Option<String> {
        identity::cookie_header(self.identity.as_ref(), &self.cookie_name)
    }

    pub(crate) fn absorb<'a>(&self, set_cookies: impl IntoIterator<Item = &'a str>) {
        identity::absorb_set_cookie(self.identity.as_ref(), &self.cookie_name, set_cookies);
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let builder = self.http.request(method, url.clone());
        match self.cookie() {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    /// Issue a request carrying the identity cookie and absorb any identity
    /// cookie in the response. Only 2xx counts as success.
    pub(crate) async fn fetch(&self, method: Method, url: &Url, body: Option<String>) -> Result<reqwest::Response, ClientError> {
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "text/plain;charset=UTF-8").body(body);
        }
        let response = builder.send().await?;
        self.absorb(response.headers().get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()));
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

// =============================================================================
// CORE
// =============================================================================

struct CoreState {
    status: ConnectionStatus,
    handlers: EventLists<Handler>,
    backlog: VecDeque<String>,
    /// Bumped on handoff so an in-flight write cannot pop someone else's head.
    epoch: u64,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared by every transport variant and its background tasks.
pub(crate) struct Core {
    kind: TransportKind,
    /// Session control handler. Runs before user handlers, never handed off.
    control: Option<Handler>,
    state: Mutex<CoreState>,
    wake: Notify,
}

fn is_live(status: ConnectionStatus) -> bool {
    matches!(status, ConnectionStatus::Open | ConnectionStatus::Connecting)
}

impl Core {
    fn new(kind: TransportKind, control: Option<Handler>) -> Self {
        let state = CoreState {
            status: ConnectionStatus::Closed,
            handlers: EventLists::default(),
            backlog: VecDeque::new(),
            epoch: 0,
            tasks: Vec::new(),
        };
        Self { kind, control, state: Mutex::new(state), wake: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub(crate) fn set_connecting(&self) {
        self.lock().status = ConnectionStatus::Connecting;
    }

    /// CONNECTING -> OPEN. Emits `open` and wakes the writer. Returns `false`
    /// if the transport was closed in the meantime.
    pub(crate) fn open(&self) -> bool {
        {
            let mut state = self.lock();
            if state.status != ConnectionStatus::Connecting {
                return false;
            }
            state.status = ConnectionStatus::Open;
        }
        debug!(kind = ?self.kind, "transport: open");
        self.emit(&Event::Open);
        self.wake.notify_one();
        true
    }

    /// Leave the live states. Only the first transition emits, and it stops
    /// every background task.
    fn settle(&self, to: ConnectionStatus, event: Event) -> bool {
        let tasks = {
            let mut state = self.lock();
            if !is_live(state.status) {
                return false;
            }
            state.status = to;
            std::mem::take(&mut state.tasks)
        };
        debug!(kind = ?self.kind, status = %to, "transport: settled");
        self.emit(&event);
        for task in tasks {
            task.abort();
        }
        true
    }

    /// Transport failure: UNKNOWN + `error`.
    pub(crate) fn fail(&self, fault: Fault) -> bool {
        self.settle(ConnectionStatus::Unknown, Event::Error(fault))
    }

    /// Orderly end of the connection: CLOSED + `close`.
    pub(crate) fn closed(&self) -> bool {
        self.settle(ConnectionStatus::Closed, Event::Close)
    }

    /// Keep a background task so it can be stopped with the transport.
    pub(crate) fn track(&self, task: JoinHandle<()>) {
        let mut state = self.lock();
        if is_live(state.status) {
            state.tasks.push(task);
        } else {
            task.abort();
        }
    }

    pub(crate) fn on(&self, kind: EventKind, handler: Handler) {
        self.lock().handlers.push(kind, handler);
    }

    /// Session control handler first, then user handlers in registration order.
    pub(crate) fn emit(&self, event: &Event) {
        if let Some(control) = &self.control {
            control(event);
        }
        self.notify(event);
    }

    /// User handlers only.
    pub(crate) fn notify(&self, event: &Event) {
        let handlers = self.lock().handlers.snapshot(event.kind());
        for handler in handlers {
            handler(event);
        }
    }

    /// Queue a wire string. Wakes the writer when open.
    pub(crate) fn enqueue(&self, text: String) -> bool {
        let open = {
            let mut state = self.lock();
            state.backlog.push_back(text);
            state.status == ConnectionStatus::Open
        };
        if open {
            self.wake.notify_one();
        }
        open
    }

    fn head(&self) -> Option<(u64, String)> {
        let state = self.lock();
        if state.status != ConnectionStatus::Open {
            return None;
        }
        state.backlog.front().map(|text| (state.epoch, text.clone()))
    }

    fn pop_written(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.backlog.pop_front();
        }
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    /// Copy-then-clear the user handlers and the backlog.
    pub(crate) fn take_handoff(&self) -> (EventLists<Handler>, VecDeque<String>) {
        let mut state = self.lock();
        state.epoch += 1;
        (std::mem::take(&mut state.handlers), std::mem::take(&mut state.backlog))
    }

    /// Install handed-off handlers and backlog ahead of anything already here.
    pub(crate) fn adopt(&self, handlers: EventLists<Handler>, backlog: VecDeque<String>) {
        let mut state = self.lock();
        let mut merged = handlers;
        merged.append(std::mem::take(&mut state.handlers));
        state.handlers = merged;
        let mut queue = backlog;
        queue.extend(state.backlog.drain(..));
        state.backlog = queue;
    }

    /// Stop everything. Emits `close` if the transport was still live.
    pub(crate) fn shut(&self) {
        if self.closed() {
            return;
        }
        let tasks = {
            let mut state = self.lock();
            state.status = ConnectionStatus::Closed;
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            task.abort();
        }
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Where the writer task puts one queued string.
pub(crate) enum Writer {
    Ws(SplitSink<WsStream, Message>),
    Http { connector: Connector, url: Url },
}

impl Writer {
    async fn write(&mut self, text: String) -> Result<(), ClientError> {
        match self {
            Self::Ws(sink) => Ok(sink.send(Message::Text(text.into())).await?),
            Self::Http { connector, url } => {
                connector.fetch(Method::POST, url, Some(text)).await?;
                Ok(())
            }
        }
    }
}

/// Drain the backlog in order for as long as the transport stays open.
pub(crate) async fn pump(core: Arc<Core>, mut writer: Writer) {
    loop {
        while let Some((epoch, text)) = core.head() {
            match writer.write(text).await {
                Ok(()) => core.pop_written(epoch),
                Err(e) => {
                    debug!(kind = ?core.kind, error = %e, "transport: write failed");
                    core.fail(e.into());
                    return;
                }
            }
        }
        if !is_live(core.status()) {
            return;
        }
        core.wake.notified().await;
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// One delivery mechanism. Created idle, started once, closed once.
pub enum Transport {
    Duplex(Duplex),
    ServerPush(ServerPush),
    Poll(Poll),
}

impl Transport {
    /// Build an idle transport. `control` runs before user handlers and is
    /// not part of the handoff.
    #[must_use]
    pub fn new(kind: TransportKind, connector: Connector, control: Option<Handler>) -> Self {
        let core = Arc::new(Core::new(kind, control));
        match kind {
            TransportKind::Duplex => Self::Duplex(Duplex::new(core, connector)),
            TransportKind::ServerPush => Self::ServerPush(ServerPush::new(core, connector)),
            TransportKind::Poll => Self::Poll(Poll::new(core, connector)),
        }
    }

    fn core(&self) -> &Arc<Core> {
        match self {
            Self::Duplex(t) => &t.core,
            Self::ServerPush(t) => &t.core,
            Self::Poll(t) => &t.core,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Duplex(_) => TransportKind::Duplex,
            Self::ServerPush(_) => TransportKind::ServerPush,
            Self::Poll(_) => TransportKind::Poll,
        }
    }

    /// Begin connecting. Must run inside a Tokio runtime.
    pub fn start(&self) {
        match self {
            Self::Duplex(t) => t.start(),
            Self::ServerPush(t) => t.start(),
            Self::Poll(t) => t.start(),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.core().status()
    }

    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.core().on(kind, handler);
    }

    /// Write now when open, otherwise queue. Either way the string joins the
    /// back of the queue, so it never overtakes earlier sends. Returns `true`
    /// if the transport was open.
    pub fn send(&self, text: String) -> bool {
        self.core().enqueue(text)
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.core().backlog_len()
    }

    pub fn close(&self) {
        debug!(kind = ?self.kind(), "transport: close");
        self.core().shut();
    }

    pub(crate) fn take_handoff(&self) -> (EventLists<Handler>, VecDeque<String>) {
        self.core().take_handoff()
    }

    pub(crate) fn adopt(&self, handlers: EventLists<Handler>, backlog: VecDeque<String>) {
        self.core().adopt(handlers, backlog);
    }

    /// Deliver an event to user handlers only.
    pub(crate) fn notify(&self, event: &Event) {
        self.core().notify(event);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
