use super::*;

#[test]
fn memory_identity_get_set_delete() {
    let store = MemoryIdentity::new();
    assert_eq!(store.get(), None);
    store.set("abc");
    assert_eq!(store.get().as_deref(), Some("abc"));
    store.delete();
    assert_eq!(store.get(), None);
}

#[test]
fn cookie_header_uses_stored_identity() {
    let store = MemoryIdentity::with_id("abc");
    assert_eq!(cookie_header(&store, "X-Request-Id").as_deref(), Some("X-Request-Id=abc"));
    assert_eq!(cookie_header(&MemoryIdentity::new(), "X-Request-Id"), None);
}

#[test]
fn set_cookie_for_identity_updates_store() {
    let store = MemoryIdentity::new();
    absorb_set_cookie(
        &store,
        "X-Request-Id",
        ["other=1; Path=/", "X-Request-Id=fresh; HttpOnly; SameSite=Lax; Path=/; Max-Age=86400"],
    );
    assert_eq!(store.get().as_deref(), Some("fresh"));
}

#[test]
fn expired_set_cookie_deletes_identity() {
    let store = MemoryIdentity::with_id("old");
    absorb_set_cookie(&store, "X-Request-Id", ["X-Request-Id=; Path=/; Max-Age=0"]);
    assert_eq!(store.get(), None);
}

#[test]
fn unrelated_cookies_are_ignored() {
    let store = MemoryIdentity::with_id("keep");
    absorb_set_cookie(&store, "X-Request-Id", ["session_token=zzz; Path=/"]);
    assert_eq!(store.get().as_deref(), Some("keep"));
}
