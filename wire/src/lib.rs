//! Shared envelope model and JSON codec for the realtime transports.
//!
//! This crate owns the wire representation used by both `server` and `client`.
//! Every unit that crosses a transport is an [`Envelope`], a raw binary frame,
//! or a bare string that gets wrapped into a `MESSAGE` envelope on receipt.
//!
//! DESIGN
//! ======
//! [`decode`] is total: malformed input never produces an error, it degrades
//! to a best-effort classification ([`Decoded::Raw`] or [`Decoded::Null`]).
//! Callers decide whether a degraded decode is worth a warning or a protocol
//! violation.

pub mod events;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub use events::{Event, EventKind, EventLists, Fault};

/// Cookie carrying the session identity between physical connections.
pub const IDENTITY_COOKIE: &str = "X-Request-Id";

/// Status code stamped on envelopes that do not carry one.
pub const DEFAULT_STATUS_CODE: i64 = 200;

// =============================================================================
// MESSAGE TYPE
// =============================================================================

/// Closed set of envelope types. Unknown wire spellings are kept verbatim in
/// [`MessageType::Other`] and treated as opaque message data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    AuthReq,
    AuthRes,
    Heartbeat,
    Error,
    CloseSocket,
    Ping,
    Pong,
    Identity,
    Subscribe,
    Unsubscribe,
    Success,
    Message,
    Other(String),
}

impl MessageType {
    /// Wire spelling of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthReq => "AUTH_REQ",
            Self::AuthRes => "AUTH_RES",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::CloseSocket => "close socket",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Identity => "IDENTITY",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Success => "SUCCESS",
            Self::Message => "MESSAGE",
            Self::Other(raw) => raw,
        }
    }

    /// Parse a wire spelling. Never fails; unknown values become `Other`.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "AUTH_REQ" => Self::AuthReq,
            "AUTH_RES" => Self::AuthRes,
            "heartbeat" => Self::Heartbeat,
            "error" => Self::Error,
            "close socket" => Self::CloseSocket,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "IDENTITY" => Self::Identity,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SUCCESS" => Self::Success,
            "MESSAGE" => Self::Message,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

fn default_status_code() -> i64 {
    DEFAULT_STATUS_CODE
}

/// A single message on the realtime wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "statusCode", default = "default_status_code")]
    pub status_code: i64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(kind: MessageType) -> Self {
        Self { status_code: DEFAULT_STATUS_CODE, kind, value: None, channel: None }
    }

    /// Wrap arbitrary data as a `MESSAGE` envelope.
    #[must_use]
    pub fn message(value: impl Into<Value>) -> Self {
        Self::new(MessageType::Message).with_value(value)
    }

    /// `IDENTITY` envelope carrying a freshly allocated session id.
    #[must_use]
    pub fn identity(id: &str) -> Self {
        Self::new(MessageType::Identity).with_value(id)
    }

    #[must_use]
    pub fn auth_request() -> Self {
        Self::new(MessageType::AuthReq)
    }

    /// Periodic liveness envelope broadcast by the server.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat).with_value("Pong")
    }

    #[must_use]
    pub fn error(status_code: i64, message: impl Into<String>) -> Self {
        Self::new(MessageType::Error)
            .with_status(status_code)
            .with_value(message.into())
    }

    #[must_use]
    pub fn success(channel: impl Into<String>) -> Self {
        Self::new(MessageType::Success).with_channel(channel)
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: i64) -> Self {
        self.status_code = status_code;
        self
    }

    /// Channel this envelope targets: the `channel` field, else a string `value`.
    #[must_use]
    pub fn target_channel(&self) -> Option<&str> {
        self.channel
            .as_deref()
            .or_else(|| self.value.as_ref().and_then(Value::as_str))
            .filter(|name| !name.is_empty())
    }

    /// Serialize to JSON text.
    ///
    /// Never fails in practice: every field is a string, an integer or a
    /// `serde_json::Value`, all of which serialize infallibly.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Build an envelope from a JSON object that carries a `type` key.
    fn from_object(mut map: Map<String, Value>) -> Self {
        let kind = match map.remove("type") {
            Some(Value::String(raw)) => MessageType::from_wire(&raw),
            Some(other) => MessageType::Other(other.to_string()),
            None => MessageType::Message,
        };
        let status_code = map
            .get("statusCode")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_STATUS_CODE);
        // Older peers put the payload under `body`.
        let value = map.remove("value").or_else(|| map.remove("body"));
        let channel = map
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Self { status_code, kind, value, channel }
    }
}

// =============================================================================
// DECODE
// =============================================================================

/// Anything that can arrive from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Raw {
    /// Already a typed envelope.
    Envelope(Envelope),
    /// A text frame, SSE data line or HTTP body.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
    /// An already-parsed JSON value (e.g. one element of a poll batch).
    Json(Value),
}

impl From<Envelope> for Raw {
    fn from(envelope: Envelope) -> Self {
        Self::Envelope(envelope)
    }
}

impl From<String> for Raw {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Raw {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Raw {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Value> for Raw {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Classification reported alongside a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedKind {
    Json,
    Raw,
    Null,
}

impl DecodedKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Raw => "raw",
            Self::Null => "null",
        }
    }
}

/// Result of [`decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Envelope),
    /// Binary payload that is not JSON. Passed through untouched.
    Raw(Vec<u8>),
    Null,
}

impl Decoded {
    #[must_use]
    pub fn kind(&self) -> DecodedKind {
        match self {
            Self::Json(_) => DecodedKind::Json,
            Self::Raw(_) => DecodedKind::Raw,
            Self::Null => DecodedKind::Null,
        }
    }

    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Json(envelope) => Some(envelope),
            Self::Raw(_) | Self::Null => None,
        }
    }

    #[must_use]
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Self::Json(envelope) => Some(envelope),
            Self::Raw(_) | Self::Null => None,
        }
    }
}

/// Classify inbound transport data. Total: never fails.
///
/// Rules, in priority order:
/// 1. typed envelopes pass through;
/// 2. strings are JSON-parsed and re-classified, or wrapped as `MESSAGE`;
/// 3. binary frames (and `{"rawData": [..]}` objects) are UTF-8 decoded and
///    JSON-parsed, else returned as [`Decoded::Raw`];
/// 4. objects with a `type` key become envelopes;
/// 5. falsy values (`null`, `false`, `0`) are [`Decoded::Null`];
/// 6. anything else is wrapped as `MESSAGE`.
pub fn decode(raw: impl Into<Raw>) -> Decoded {
    match raw.into() {
        Raw::Envelope(envelope) => Decoded::Json(envelope),
        Raw::Text(text) => decode_text(text),
        Raw::Binary(bytes) => decode_bytes(bytes),
        Raw::Json(value) => decode_value(value),
    }
}

fn decode_text(text: String) -> Decoded {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => decode_value(value),
        Err(_) => Decoded::Json(Envelope::message(text)),
    }
}

fn decode_bytes(bytes: Vec<u8>) -> Decoded {
    let parsed = serde_json::from_str::<Value>(&String::from_utf8_lossy(&bytes));
    match parsed {
        Ok(value) => decode_value(value),
        Err(_) => Decoded::Raw(bytes),
    }
}

fn decode_value(value: Value) -> Decoded {
    match value {
        Value::String(text) => decode_text(text),
        Value::Object(map) => {
            if let Some(bytes) = raw_data(&map) {
                return decode_bytes(bytes);
            }
            if map.contains_key("type") {
                return Decoded::Json(Envelope::from_object(map));
            }
            Decoded::Json(Envelope::message(Value::Object(map)))
        }
        other if is_falsy(&other) => Decoded::Null,
        other => Decoded::Json(Envelope::message(other)),
    }
}

/// Byte payload of a `{"rawData": [u8, ..]}` object, if it is one.
fn raw_data(map: &Map<String, Value>) -> Option<Vec<u8>> {
    map.get("rawData")?
        .as_array()?
        .iter()
        .map(|byte| byte.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        // Strings and objects are decoded before this is consulted.
        Value::String(_) | Value::Array(_) | Value::Object(_) => false,
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Outbound data accepted by `send`. Strings pass through unchanged,
/// everything else is serialized to JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Envelope(Envelope),
    Json(Value),
}

impl Payload {
    /// Wire text for this payload.
    #[must_use]
    pub fn into_wire(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Envelope(envelope) => envelope.encode(),
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Envelope> for Payload {
    fn from(envelope: Envelope) -> Self {
        Self::Envelope(envelope)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// =============================================================================
// CONNECTION STATUS
// =============================================================================

/// Status of one transport, one endpoint, or a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Open,
    Closed,
    Unknown,
    Connecting,
    /// Deliberate, terminal close. Distinguishes a voluntary close from a failure.
    Shutdown,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Unknown => "UNKNOWN",
            Self::Connecting => "CONNECTING",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

// =============================================================================
// TRANSPORT KIND
// =============================================================================

/// The three delivery mechanisms, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent bidirectional connection (WebSocket).
    Duplex,
    /// Inbound event stream plus one outbound request per send (SSE).
    ServerPush,
    /// Periodic pull plus one outbound request per send.
    Poll,
}

impl TransportKind {
    /// Fallback priority; lower ranks are tried first.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Duplex => 1,
            Self::ServerPush => 2,
            Self::Poll => 3,
        }
    }

    #[must_use]
    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Duplex),
            2 => Some(Self::ServerPush),
            3 => Some(Self::Poll),
            _ => None,
        }
    }

    /// Next transport to fall back to. `None` once polling is exhausted.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::from_rank(self.rank() + 1)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Duplex => "WebSocket",
            Self::ServerPush => "Server Sent Events",
            Self::Poll => "Long Polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing a [`TransportKind`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport `{0}` (expected duplex, push or poll)")]
pub struct UnknownTransport(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "duplex" | "ws" | "websocket" => Ok(Self::Duplex),
            "push" | "sse" | "server_push" => Ok(Self::ServerPush),
            "poll" | "polling" => Ok(Self::Poll),
            other => Err(UnknownTransport(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
