//! Event surface shared by client transports and server endpoints.
//!
//! Both sides keep four append-only handler lists (data, error, open, close).
//! Lists are invoked synchronously in registration order; there is no
//! priority and no deduplication.

use crate::{Decoded, Envelope};

/// Which handler list an event is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Error,
    Open,
    Close,
}

/// Failure reported through the `error` handler list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Connection drop, refused connect, rejected send.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Inbound data that violates the envelope protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Every transport variant was tried and failed. Reported once.
    #[error("all transports failed")]
    Exhausted,
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    Data(Decoded),
    Error(Fault),
    Close,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Data(_) => EventKind::Data,
            Self::Error(_) => EventKind::Error,
            Self::Close => EventKind::Close,
        }
    }

    /// The decoded envelope of a data event, if it carried one.
    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Data(decoded) => decoded.envelope(),
            Self::Open | Self::Error(_) | Self::Close => None,
        }
    }
}

/// Four ordered handler lists keyed by [`EventKind`].
#[derive(Clone)]
pub struct EventLists<H> {
    data: Vec<H>,
    error: Vec<H>,
    open: Vec<H>,
    close: Vec<H>,
}

impl<H> Default for EventLists<H> {
    fn default() -> Self {
        Self { data: Vec::new(), error: Vec::new(), open: Vec::new(), close: Vec::new() }
    }
}

impl<H> EventLists<H> {
    fn list(&self, kind: EventKind) -> &Vec<H> {
        match kind {
            EventKind::Data => &self.data,
            EventKind::Error => &self.error,
            EventKind::Open => &self.open,
            EventKind::Close => &self.close,
        }
    }

    fn list_mut(&mut self, kind: EventKind) -> &mut Vec<H> {
        match kind {
            EventKind::Data => &mut self.data,
            EventKind::Error => &mut self.error,
            EventKind::Open => &mut self.open,
            EventKind::Close => &mut self.close,
        }
    }

    pub fn push(&mut self, kind: EventKind, handler: H) {
        self.list_mut(kind).push(handler);
    }

    #[must_use]
    pub fn len(&self, kind: EventKind) -> usize {
        self.list(kind).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.error.is_empty() && self.open.is_empty() && self.close.is_empty()
    }

    /// Append every handler of `later` after the existing ones, per kind.
    pub fn append(&mut self, mut later: Self) {
        self.data.append(&mut later.data);
        self.error.append(&mut later.error);
        self.open.append(&mut later.open);
        self.close.append(&mut later.close);
    }
}

impl<H: Clone> EventLists<H> {
    /// Clone out the handlers for one kind so they can run without holding a lock.
    #[must_use]
    pub fn snapshot(&self, kind: EventKind) -> Vec<H> {
        self.list(kind).clone()
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
