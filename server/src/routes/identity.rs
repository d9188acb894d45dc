//! Session identity cookie.
//!
//! The identity travels as a plain cookie so every transport (WebSocket
//! upgrade, SSE stream, poll requests) presents it without extra plumbing.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::config::Config;

/// Identity presented by the caller, if any.
#[must_use]
pub fn presented(jar: &CookieJar, config: &Config) -> Option<String> {
    jar.get(&config.identity_cookie)
        .map(Cookie::value)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Set (or refresh) the identity cookie on the response.
#[must_use]
pub fn remember(jar: CookieJar, config: &Config, id: &str) -> CookieJar {
    let cookie = Cookie::build((config.identity_cookie.clone(), id.to_owned()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(Duration::days(1));
    jar.add(cookie)
}

/// Clear the identity cookie.
#[must_use]
pub fn forget(jar: CookieJar, config: &Config) -> CookieJar {
    let cookie = Cookie::build((config.identity_cookie.clone(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(Duration::ZERO);
    jar.add(cookie)
}
