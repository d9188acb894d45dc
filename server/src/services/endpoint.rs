//! Server-side endpoint: one session's current physical connection.
//!
//! DESIGN
//! ======
//! An `Endpoint` is a cheap clonable handle around shared state guarded by a
//! `std::sync::Mutex`. The physical connection is reached through a [`Link`]:
//! duplex and push links are unbounded channels drained by the connection
//! task, poll endpoints keep everything in the backlog until the next pull.
//!
//! ORDERING
//! ========
//! `send`, `drain` and `requeue_front` all run under the same lock and write
//! into the same channel, so wire strings leave in the order they were
//! accepted. A send never jumps ahead of a non-empty backlog.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wire::{ConnectionStatus, Decoded, Event, EventKind, EventLists, Fault, Payload, Raw, TransportKind};

use crate::services::handshake::Phase;
use crate::state::Hub;

/// Callback registered on an endpoint or on the client registry.
pub type Handler = Arc<dyn Fn(&Hub, &Endpoint, &Event) + Send + Sync>;

// =============================================================================
// LINK
// =============================================================================

/// Write side of the physical connection.
#[derive(Debug, Clone)]
pub enum Link {
    /// WebSocket connection task.
    Duplex(mpsc::UnboundedSender<String>),
    /// SSE stream task.
    Push(mpsc::UnboundedSender<String>),
    /// No connection; data waits for the next pull.
    Poll,
    /// Physical connection gone.
    Detached,
}

impl Link {
    /// Attempt a direct write. Returns the text back on failure.
    fn write(&self, text: String) -> Result<(), String> {
        match self {
            Self::Duplex(tx) | Self::Push(tx) => tx.send(text).map_err(|e| e.0),
            Self::Poll | Self::Detached => Err(text),
        }
    }

    fn is_writable(&self) -> bool {
        matches!(self, Self::Duplex(_) | Self::Push(_))
    }
}

// =============================================================================
// ENDPOINT
// =============================================================================

struct EndpointState {
    link: Link,
    status: ConnectionStatus,
    phase: Phase,
    backlog: VecDeque<String>,
    handlers: EventLists<Handler>,
    channels: BTreeSet<String>,
    expiry: Option<JoinHandle<()>>,
}

struct EndpointInner {
    id: String,
    kind: TransportKind,
    state: Mutex<EndpointState>,
}

/// Handle to one registered connection for a session identity.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TransportKind, link: Link) -> Self {
        let status = if matches!(link, Link::Detached) { ConnectionStatus::Closed } else { ConnectionStatus::Open };
        let state = EndpointState {
            link,
            status,
            phase: Phase::New,
            backlog: VecDeque::new(),
            handlers: EventLists::default(),
            channels: BTreeSet::new(),
            expiry: None,
        };
        Self { inner: Arc::new(EndpointInner { id: id.into(), kind, state: Mutex::new(state) }) }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    /// Whether both handles point at the same connection.
    #[must_use]
    pub fn same(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.lock().status = status;
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    /// Whether a physical connection (or a poll slot) is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !matches!(self.lock().link, Link::Detached)
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Deliver a payload, or queue it behind anything not yet sent.
    ///
    /// Returns `true` only when the payload was handed to the link. A failed
    /// write leaves the payload queued and marks the endpoint closed; the
    /// connection task reports the loss itself.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        let text = payload.into().into_wire();
        let mut state = self.lock();
        if state.status != ConnectionStatus::Open || !state.backlog.is_empty() || !state.link.is_writable() {
            state.backlog.push_back(text);
            return false;
        }
        match state.link.write(text) {
            Ok(()) => true,
            Err(text) => {
                debug!(id = %self.inner.id, "endpoint: link write failed, queued");
                state.backlog.push_back(text);
                state.status = ConnectionStatus::Closed;
                false
            }
        }
    }

    /// Flush the backlog FIFO through the link. Stops at the first failure and
    /// keeps the unsent tail in order. Returns the number of strings written.
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        if state.status != ConnectionStatus::Open || !state.link.is_writable() {
            return 0;
        }
        let mut written = 0;
        while let Some(text) = state.backlog.pop_front() {
            if let Err(text) = state.link.write(text) {
                state.backlog.push_front(text);
                state.status = ConnectionStatus::Closed;
                break;
            }
            written += 1;
        }
        written
    }

    /// Take the whole backlog. Used by poll pulls.
    #[must_use]
    pub fn take_backlog(&self) -> Vec<String> {
        self.lock().backlog.drain(..).collect()
    }

    /// Put strings back at the head of the backlog, preserving their order.
    pub fn requeue_front(&self, texts: Vec<String>) {
        let mut state = self.lock();
        for text in texts.into_iter().rev() {
            state.backlog.push_front(text);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Take over everything the previous connection of this session owned:
    /// handlers, backlog, channel memberships, handshake phase. The old
    /// endpoint is left empty. Its handlers and backlog run ahead of any this
    /// endpoint already had.
    pub fn adopt(&self, old: &Endpoint) {
        let (handlers, backlog, channels, phase, expiry) = {
            let mut prior = old.lock();
            (
                std::mem::take(&mut prior.handlers),
                std::mem::take(&mut prior.backlog),
                std::mem::take(&mut prior.channels),
                prior.phase,
                prior.expiry.take(),
            )
        };
        if let Some(expiry) = expiry {
            expiry.abort();
        }

        let mut state = self.lock();
        let mut merged = handlers;
        merged.append(std::mem::take(&mut state.handlers));
        state.handlers = merged;
        let mut queue = backlog;
        queue.extend(state.backlog.drain(..));
        state.backlog = queue;
        state.channels.extend(channels);
        state.phase = phase;
    }

    /// Drop the link. Returns `true` the first time only.
    pub fn close_link(&self) -> bool {
        let mut state = self.lock();
        if matches!(state.link, Link::Detached) {
            return false;
        }
        state.link = Link::Detached;
        state.status = ConnectionStatus::Closed;
        true
    }

    /// Replace the pending expiry timer, aborting the previous one.
    pub fn set_expiry(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock().expiry.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_expiry(&self) {
        if let Some(expiry) = self.lock().expiry.take() {
            expiry.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Channel bookkeeping
    // -------------------------------------------------------------------------

    pub(crate) fn join_channel(&self, name: &str) {
        self.lock().channels.insert(name.to_owned());
    }

    pub(crate) fn leave_channel(&self, name: &str) {
        self.lock().channels.remove(name);
    }

    pub(crate) fn take_channels(&self) -> BTreeSet<String> {
        std::mem::take(&mut self.lock().channels)
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.lock().channels.iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.lock().handlers.push(kind, handler);
    }

    /// Invoke every handler of the event's kind, in registration order.
    /// Handlers run without the endpoint lock held.
    pub fn emit(&self, hub: &Hub, event: &Event) {
        let handlers = self.lock().handlers.snapshot(event.kind());
        for handler in handlers {
            handler(hub, self, event);
        }
    }

    /// Decode inbound transport data and emit it.
    pub fn receive(&self, hub: &Hub, raw: impl Into<Raw>) {
        let decoded = wire::decode(raw);
        if !matches!(decoded, Decoded::Json(_)) {
            warn!(id = %self.inner.id, kind = decoded.kind().as_str(), "endpoint: non-envelope inbound data");
            if hub.config().strict_envelopes {
                let fault = Fault::Protocol(format!("{} payload", decoded.kind().as_str()));
                self.emit(hub, &Event::Error(fault));
                return;
            }
        }
        self.emit(hub, &Event::Data(decoded));
    }
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod tests;
