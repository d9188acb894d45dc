//! Relay services: endpoints, registries, handshake and heartbeat.

pub mod channel;
pub mod endpoint;
pub mod handshake;
pub mod heartbeat;
pub mod registry;
