//! Server configuration loaded from environment variables.
//!
//! Every knob has a default, so an empty environment yields a working relay.
//! Values that parse but make no sense (a zero heartbeat, an empty cookie
//! name) are rejected up front rather than failing later inside a timer.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_DETACH_GRACE_MS: u64 = 15_000;
const DEFAULT_POLL_IDLE_TTL_MS: u64 = 60_000;

/// Startup configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid identity cookie name `{0}`")]
    InvalidCookieName(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Period of the heartbeat broadcast.
    pub heartbeat_interval: Duration,
    /// How long a physically disconnected endpoint stays registered waiting
    /// for its session to reconnect. Zero closes immediately.
    pub detach_grace: Duration,
    /// Poll endpoints expire after this long without a pull or push.
    pub poll_idle_ttl: Duration,
    /// Run the AUTH_REQ / AUTH_RES exchange before activating an endpoint.
    pub auth_handshake: bool,
    /// Treat non-envelope inbound data as a protocol violation.
    pub strict_envelopes: bool,
    /// Remove a channel once its last member unsubscribes.
    pub drop_empty_channels: bool,
    pub identity_cookie: String,
    pub cookie_secure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            detach_grace: Duration::from_millis(DEFAULT_DETACH_GRACE_MS),
            poll_idle_ttl: Duration::from_millis(DEFAULT_POLL_IDLE_TTL_MS),
            auth_handshake: true,
            strict_envelopes: false,
            drop_empty_channels: false,
            identity_cookie: wire::IDENTITY_COOKIE.to_owned(),
            cookie_secure: false,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an interval is zero or the cookie name is
    /// not a valid HTTP token.
    pub fn from_env() -> Result<Self, ConfigError> {
        let heartbeat_ms = env_parse("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS);
        let poll_idle_ms = env_parse("POLL_IDLE_TTL_MS", DEFAULT_POLL_IDLE_TTL_MS);
        if heartbeat_ms == 0 {
            return Err(ConfigError::ZeroInterval("HEARTBEAT_INTERVAL_MS"));
        }
        if poll_idle_ms == 0 {
            return Err(ConfigError::ZeroInterval("POLL_IDLE_TTL_MS"));
        }

        let identity_cookie = std::env::var("IDENTITY_COOKIE").unwrap_or_else(|_| wire::IDENTITY_COOKIE.to_owned());
        if !is_cookie_name(&identity_cookie) {
            return Err(ConfigError::InvalidCookieName(identity_cookie));
        }

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            detach_grace: Duration::from_millis(env_parse("DETACH_GRACE_MS", DEFAULT_DETACH_GRACE_MS)),
            poll_idle_ttl: Duration::from_millis(poll_idle_ms),
            auth_handshake: env_bool("AUTH_HANDSHAKE").unwrap_or(true),
            strict_envelopes: env_bool("STRICT_ENVELOPES").unwrap_or(false),
            drop_empty_channels: env_bool("DROP_EMPTY_CHANNELS").unwrap_or(false),
            identity_cookie,
            cookie_secure: env_bool("COOKIE_SECURE").unwrap_or(false),
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// RFC 6265 cookie-name: a non-empty HTTP token.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
