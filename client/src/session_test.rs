use super::*;
use crate::identity::MemoryIdentity;

fn unreachable_config() -> SessionConfig {
    // Port 9 is discard; nothing listens on it in the test environment.
    SessionConfig::from_base("http://127.0.0.1:9")
        .expect("base")
        .with_retry_interval(Duration::from_secs(60))
}

#[test]
fn config_defaults() {
    let config = SessionConfig::from_base("http://relay.test").expect("base");
    assert_eq!(config.start, TransportKind::Duplex);
    assert_eq!(config.retry_interval, Duration::from_secs(4));
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.identity_cookie, "X-Request-Id");
    assert!(config.auth_channel.is_none());
}

#[test]
fn config_builders() {
    let config = SessionConfig::from_base("http://relay.test")
        .expect("base")
        .with_start(TransportKind::Poll)
        .with_retry_interval(Duration::from_millis(250))
        .with_poll_interval(Duration::from_millis(100))
        .with_auth_channel("lobby")
        .with_identity_cookie("sid");
    assert_eq!(config.start, TransportKind::Poll);
    assert_eq!(config.retry_interval, Duration::from_millis(250));
    assert_eq!(config.poll_interval, Duration::from_millis(100));
    assert_eq!(config.auth_channel.as_deref(), Some("lobby"));
    assert_eq!(config.identity_cookie, "sid");
}

#[test]
fn identity_handler_stores_issued_id_only() {
    let store = Arc::new(MemoryIdentity::new());
    let handler = identity_handler(store.clone());

    handler(&Event::Data(wire::decode(Envelope::message("not an id"))));
    assert_eq!(store.get(), None);

    handler(&Event::Data(wire::decode(Envelope::identity("abc"))));
    assert_eq!(store.get().as_deref(), Some("abc"));
}

#[tokio::test]
async fn send_before_open_is_queued() {
    let session = Session::connect(unreachable_config(), Arc::new(MemoryIdentity::new())).expect("session");
    assert!(!session.send("early"));
    assert!(!session.subscribe("room"));
    assert_ne!(session.status(), ConnectionStatus::Open);
    session.close();
}

#[tokio::test]
async fn close_is_terminal() {
    let session = Session::connect(unreachable_config(), Arc::new(MemoryIdentity::new())).expect("session");
    session.close();
    assert_eq!(session.status(), ConnectionStatus::Shutdown);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.status(), ConnectionStatus::Shutdown);
    assert_eq!(session.kind(), TransportKind::Duplex);
}

#[tokio::test]
async fn fallback_is_refused_once_open() {
    let session = Session::connect(unreachable_config(), Arc::new(MemoryIdentity::new())).expect("session");
    session.inner.lock().status = ConnectionStatus::Open;

    assert!(!session.inner.switch_to(TransportKind::ServerPush));
    assert!(!session.inner.advance());
    assert_eq!(session.kind(), TransportKind::Duplex);
    assert_eq!(session.status(), ConnectionStatus::Open);
    session.close();
}

#[tokio::test]
async fn fallback_reports_connecting_while_next_transport_starts() {
    let session = Session::connect(unreachable_config(), Arc::new(MemoryIdentity::new())).expect("session");
    session.inner.lock().status = ConnectionStatus::Unknown;

    assert!(session.inner.advance());
    assert_eq!(session.kind(), TransportKind::ServerPush);
    assert_eq!(session.status(), ConnectionStatus::Connecting);
    session.close();
}
