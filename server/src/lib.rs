//! Realtime relay server.
//!
//! ARCHITECTURE
//! ============
//! `routes` translates the three transports (WebSocket, SSE, long polling)
//! into calls on the shared [`Hub`]. `services` holds the transport-agnostic
//! core: endpoints, the client and channel registries, the handshake state
//! machine and the heartbeat.

pub mod config;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{Config, ConfigError};
pub use state::{AppState, Hub};
