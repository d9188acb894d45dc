//! Client side of the tether relay.
//!
//! [`Session`] is the entry point: it connects over the best transport the
//! network allows (WebSocket, then server-sent events, then polling), keeps
//! handlers and queued payloads across fallbacks, and remembers the identity
//! the relay issues so reconnects resume the same server-side session.

pub mod error;
pub mod identity;
pub mod session;
pub mod transport;

pub use error::ClientError;
pub use identity::{IdentityStore, MemoryIdentity};
pub use session::{Session, SessionConfig};
pub use transport::{Endpoints, Handler, Transport};
