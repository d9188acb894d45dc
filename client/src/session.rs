//! Client session: one stable event surface over a changing transport.
//!
//! DESIGN
//! ======
//! A session starts on its configured transport and walks down the fixed
//! priority order (duplex, push, poll) whenever the current one fails to
//! open. Each switch copies the outgoing transport's user handlers and
//! backpressure queue into its replacement before the old one is closed, so
//! the application never re-registers handlers and never loses a queued
//! payload. Running out of transports is reported once as
//! [`Fault::Exhausted`] and the session stops retrying.
//!
//! LOCKING
//! =======
//! The session lock is never held while a transport is started or closed,
//! since both can run handlers that call back into the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use wire::{ConnectionStatus, Envelope, Event, EventKind, Fault, MessageType, Payload, TransportKind};

use crate::error::ClientError;
use crate::identity::IdentityStore;
use crate::transport::{Connector, Endpoints, Handler, Transport};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(4);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoints: Endpoints,
    /// Transport tried first. Fallback only ever moves down the priority order.
    pub start: TransportKind,
    pub retry_interval: Duration,
    pub poll_interval: Duration,
    pub identity_cookie: String,
    /// Channel to name in the reply to the relay's auth request. Without one
    /// the application answers the handshake itself via
    /// [`Session::authenticate`].
    pub auth_channel: Option<String>,
}

impl SessionConfig {
    #[must_use]
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            start: TransportKind::Duplex,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            identity_cookie: wire::IDENTITY_COOKIE.to_owned(),
            auth_channel: None,
        }
    }

    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] if `base` is not an HTTP URL.
    pub fn from_base(base: &str) -> Result<Self, ClientError> {
        Ok(Self::new(Endpoints::from_base(base)?))
    }

    #[must_use]
    pub fn with_start(mut self, start: TransportKind) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_auth_channel(mut self, channel: impl Into<String>) -> Self {
        self.auth_channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_identity_cookie(mut self, name: impl Into<String>) -> Self {
        self.identity_cookie = name.into();
        self
    }
}

// =============================================================================
// STATE
// =============================================================================

struct SessionState {
    transport: Arc<Transport>,
    kind: TransportKind,
    /// Bumped on every switch. Events from older transports are ignored.
    generation: u64,
    status: ConnectionStatus,
    retry: Option<JoinHandle<()>>,
    exhausted: bool,
}

struct SessionInner {
    connector: Connector,
    retry_interval: Duration,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// React to an event from the transport of `generation`.
    fn observe(self: &Arc<Self>, generation: u64, event: &Event) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        match event {
            Event::Open => {
                debug!(kind = %state.kind, "session: open");
                state.status = ConnectionStatus::Open;
                if let Some(retry) = state.retry.take() {
                    retry.abort();
                }
            }
            Event::Close => {
                if state.status == ConnectionStatus::Shutdown || state.exhausted {
                    return;
                }
                debug!(kind = %state.kind, "session: transport closed");
                state.status = ConnectionStatus::Closed;
                if state.retry.is_none() {
                    state.retry = Some(self.spawn_retry(false));
                }
            }
            Event::Error(fault) => {
                if state.status == ConnectionStatus::Shutdown || state.exhausted {
                    return;
                }
                warn!(kind = %state.kind, %fault, "session: transport error");
                state.status = ConnectionStatus::Unknown;
                if state.retry.is_none() {
                    state.retry = Some(self.spawn_retry(true));
                }
            }
            Event::Data(_) => {}
        }
    }

    fn spawn_retry(self: &Arc<Self>, immediate: bool) -> JoinHandle<()> {
        tokio::spawn(retry(Arc::downgrade(self), self.retry_interval, immediate))
    }

    /// One retry tick. Returns `false` once there is nothing left to retry.
    fn advance(self: &Arc<Self>) -> bool {
        let (from, next) = {
            let mut state = self.lock();
            if matches!(state.status, ConnectionStatus::Open | ConnectionStatus::Shutdown) {
                state.retry = None;
                return false;
            }
            match state.kind.next() {
                Some(next) => (state.kind, next),
                None => {
                    state.exhausted = true;
                    state.status = ConnectionStatus::Closed;
                    state.retry = None;
                    let transport = Arc::clone(&state.transport);
                    drop(state);
                    warn!("session: all transports failed");
                    transport.close();
                    transport.notify(&Event::Error(Fault::Exhausted));
                    return false;
                }
            }
        };
        // The current transport can open between the check above and the swap.
        if !self.switch_to(next) {
            return false;
        }
        info!(%from, to = %next, "session: falling back");
        true
    }

    /// Install a transport of `kind` in place of the current one and start it.
    /// Refused once the session is open or shut down.
    fn switch_to(self: &Arc<Self>, kind: TransportKind) -> bool {
        let (old, new) = {
            let mut state = self.lock();
            if matches!(state.status, ConnectionStatus::Open | ConnectionStatus::Shutdown) {
                return false;
            }
            state.generation += 1;
            state.kind = kind;
            state.status = ConnectionStatus::Connecting;
            let control = control(Arc::downgrade(self), state.generation);
            let new = Arc::new(Transport::new(kind, self.connector.clone(), Some(control)));
            let (handlers, backlog) = state.transport.take_handoff();
            new.adopt(handlers, backlog);
            let old = std::mem::replace(&mut state.transport, Arc::clone(&new));
            (old, new)
        };
        old.close();
        new.start();
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(retry) = state.retry.take() {
            retry.abort();
        }
        state.transport.close();
    }
}

fn control(session: Weak<SessionInner>, generation: u64) -> Handler {
    Arc::new(move |event: &Event| {
        if let Some(inner) = session.upgrade() {
            inner.observe(generation, event);
        }
    })
}

async fn retry(session: Weak<SessionInner>, period: Duration, immediate: bool) {
    let first = if immediate { Instant::now() } else { Instant::now() + period };
    let mut ticks = interval_at(first, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let Some(inner) = session.upgrade() else {
            return;
        };
        if !inner.advance() {
            return;
        }
    }
}

/// Remember identities the relay hands out.
fn identity_handler(store: Arc<dyn IdentityStore>) -> Handler {
    Arc::new(move |event: &Event| {
        let Some(envelope) = event.envelope() else {
            return;
        };
        if envelope.kind != MessageType::Identity {
            return;
        }
        if let Some(id) = envelope.value.as_ref().and_then(Value::as_str).filter(|id| !id.is_empty()) {
            debug!(%id, "session: identity issued");
            store.set(id);
        }
    })
}

/// Answer the relay's auth request with a channel.
fn auth_handler(session: Weak<SessionInner>, channel: String) -> Handler {
    Arc::new(move |event: &Event| {
        let Some(envelope) = event.envelope() else {
            return;
        };
        if envelope.kind != MessageType::AuthReq {
            return;
        }
        if let Some(inner) = session.upgrade() {
            let reply = Envelope::new(MessageType::AuthRes).with_channel(channel.clone()).encode();
            inner.lock().transport.send(reply);
        }
    })
}

// =============================================================================
// SESSION
// =============================================================================

/// Handle to a running session. Clones share the session; it shuts down when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the HTTP client cannot be built.
    /// Connection failures are not errors here; they surface as `error`
    /// events and drive fallback.
    pub fn connect(config: SessionConfig, identity: Arc<dyn IdentityStore>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let connector = Connector::new(
            http,
            config.endpoints,
            Arc::clone(&identity),
            config.identity_cookie,
            config.poll_interval,
        );
        let start = config.start;
        let auth_channel = config.auth_channel;

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let transport = Transport::new(start, connector.clone(), Some(control(weak.clone(), 0)));
            transport.on(EventKind::Data, identity_handler(identity));
            if let Some(channel) = auth_channel {
                transport.on(EventKind::Data, auth_handler(weak.clone(), channel));
            }
            let state = SessionState {
                transport: Arc::new(transport),
                kind: start,
                generation: 0,
                status: ConnectionStatus::Connecting,
                retry: None,
                exhausted: false,
            };
            SessionInner { connector, retry_interval: config.retry_interval, state: Mutex::new(state) }
        });

        info!(kind = %start, "session: connecting");
        let first = Arc::clone(&inner.lock().transport);
        first.start();
        Ok(Self { inner })
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// Transport currently in use.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.inner.lock().kind
    }

    /// Register a handler. It survives every transport switch.
    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.inner.lock().transport.on(kind, handler);
    }

    /// Send a payload. Strings go out verbatim, anything else as JSON.
    /// Returns `true` if the session was open; otherwise the payload waits in
    /// the backpressure queue.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        let text = payload.into().into_wire();
        let state = self.inner.lock();
        state.transport.send(text) && state.status == ConnectionStatus::Open
    }

    pub fn subscribe(&self, channel: &str) -> bool {
        self.send(Envelope::new(MessageType::Subscribe).with_channel(channel))
    }

    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.send(Envelope::new(MessageType::Unsubscribe).with_channel(channel))
    }

    /// Relay `value` to every member of `channel`.
    pub fn publish(&self, channel: &str, value: impl Into<Value>) -> bool {
        self.send(Envelope::message(value).with_channel(channel))
    }

    /// Answer the relay's auth request by hand.
    pub fn authenticate(&self, channel: &str) -> bool {
        self.send(Envelope::new(MessageType::AuthRes).with_channel(channel))
    }

    /// Shut the session down for good. No retry follows.
    pub fn close(&self) {
        let (transport, retry) = {
            let mut state = self.inner.lock();
            state.status = ConnectionStatus::Shutdown;
            (Arc::clone(&state.transport), state.retry.take())
        };
        if let Some(retry) = retry {
            retry.abort();
        }
        info!("session: shutdown");
        transport.close();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
