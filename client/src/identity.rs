//! Session identity persistence.
//!
//! The relay allocates an identity on first contact and expects it back, as a
//! cookie, on every later connection. Where the identity lives between
//! connections is up to the application: implement [`IdentityStore`] for a
//! file, a keychain, or anything else. [`MemoryIdentity`] keeps it for the
//! lifetime of the process.

use std::sync::{Mutex, PoisonError};

pub trait IdentityStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, id: &str);
    fn delete(&self);
}

#[derive(Debug, Default)]
pub struct MemoryIdentity {
    id: Mutex<Option<String>>,
}

impl MemoryIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known identity, e.g. one saved by an earlier run.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Mutex::new(Some(id.into())) }
    }
}

impl IdentityStore for MemoryIdentity {
    fn get(&self) -> Option<String> {
        self.id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, id: &str) {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_owned());
    }

    fn delete(&self) {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// `Cookie` request header value carrying the stored identity.
pub(crate) fn cookie_header(store: &dyn IdentityStore, cookie_name: &str) -> Option<String> {
    store
        .get()
        .filter(|id| !id.is_empty())
        .map(|id| format!("{cookie_name}={id}"))
}

/// Apply `Set-Cookie` header values for the identity cookie to the store.
/// An empty value or `Max-Age=0` deletes the stored identity.
pub(crate) fn absorb_set_cookie<'a>(
    store: &dyn IdentityStore,
    cookie_name: &str,
    values: impl IntoIterator<Item = &'a str>,
) {
    for raw in values {
        let mut parts = raw.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            continue;
        };
        if name.trim() != cookie_name {
            continue;
        }
        let expired = parts.any(|attr| attr.eq_ignore_ascii_case("max-age=0"));
        let value = value.trim().trim_matches('"');
        if expired || value.is_empty() {
            store.delete();
        } else {
            store.set(value);
        }
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
