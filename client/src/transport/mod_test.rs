use super::*;
use crate::identity::MemoryIdentity;
use std::sync::atomic::{AtomicUsize, Ordering};

fn connector() -> Connector {
    Connector::new(
        reqwest::Client::new(),
        Endpoints::from_base("http://127.0.0.1:9").expect("base"),
        Arc::new(MemoryIdentity::new()),
        wire::IDENTITY_COOKIE,
        Duration::from_secs(5),
    )
}

fn counter() -> (Arc<AtomicUsize>, Handler) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let handler: Handler = Arc::new(move |_: &Event| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (count, handler)
}

// =============================================================================
// ENDPOINTS
// =============================================================================

#[test]
fn endpoints_derive_from_http_base() {
    let endpoints = Endpoints::from_base("http://relay.test:8080").expect("valid");
    assert_eq!(endpoints.ws.as_str(), "ws://relay.test:8080/realtime/ws");
    assert_eq!(endpoints.push_get.as_str(), "http://relay.test:8080/sse/get");
    assert_eq!(endpoints.push_put.as_str(), "http://relay.test:8080/sse/put");
    assert_eq!(endpoints.poll_get.as_str(), "http://relay.test:8080/poll/get");
    assert_eq!(endpoints.poll_put.as_str(), "http://relay.test:8080/poll/put");
}

#[test]
fn endpoints_keep_base_path_and_secure_scheme() {
    let endpoints = Endpoints::from_base("https://relay.test/app").expect("valid");
    assert_eq!(endpoints.ws.as_str(), "wss://relay.test/app/realtime/ws");
    assert_eq!(endpoints.poll_get.as_str(), "https://relay.test/app/poll/get");
}

#[test]
fn endpoints_reject_non_http_base() {
    assert!(matches!(Endpoints::from_base("ftp://relay.test"), Err(ClientError::InvalidBaseUrl(_))));
    assert!(matches!(Endpoints::from_base("not a url"), Err(ClientError::InvalidBaseUrl(_))));
}

// =============================================================================
// QUEUE / HANDOFF
// =============================================================================

#[test]
fn send_before_open_queues_in_order() {
    let transport = Transport::new(TransportKind::Poll, connector(), None);
    assert_eq!(transport.status(), ConnectionStatus::Closed);
    assert!(!transport.send("one".to_owned()));
    assert!(!transport.send("two".to_owned()));
    assert_eq!(transport.backlog_len(), 2);

    let (_, backlog) = transport.take_handoff();
    assert_eq!(backlog, VecDeque::from(vec!["one".to_owned(), "two".to_owned()]));
    assert_eq!(transport.backlog_len(), 0);
}

#[test]
fn adopt_puts_handed_off_state_first() {
    let old = Transport::new(TransportKind::Duplex, connector(), None);
    let new = Transport::new(TransportKind::ServerPush, connector(), None);
    old.send("first".to_owned());
    new.send("later".to_owned());

    let (old_count, old_handler) = counter();
    old.on(EventKind::Data, old_handler);

    let (handlers, backlog) = old.take_handoff();
    new.adopt(handlers, backlog);

    let (_, backlog) = new.take_handoff();
    assert_eq!(backlog, VecDeque::from(vec!["first".to_owned(), "later".to_owned()]));

    old.notify(&Event::Data(wire::decode("x")));
    assert_eq!(old_count.load(Ordering::SeqCst), 0, "handlers moved away from old transport");
}

#[test]
fn control_handler_runs_before_user_handlers_and_is_not_handed_off() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let control_log = Arc::clone(&order);
    let control: Handler = Arc::new(move |_: &Event| control_log.lock().expect("lock").push("control"));
    let core = Core::new(TransportKind::Duplex, Some(control));
    let user_log = Arc::clone(&order);
    core.on(EventKind::Open, Arc::new(move |_: &Event| user_log.lock().expect("lock").push("user")));

    core.set_connecting();
    assert!(core.open());
    assert_eq!(*order.lock().expect("lock"), vec!["control", "user"]);

    let (handlers, _) = core.take_handoff();
    assert_eq!(handlers.len(EventKind::Open), 1);
}

#[test]
fn failure_is_reported_once() {
    let core = Core::new(TransportKind::Duplex, None);
    let (errors, on_error) = counter();
    let (closes, on_close) = counter();
    core.on(EventKind::Error, on_error);
    core.on(EventKind::Close, on_close);

    core.set_connecting();
    assert!(core.open());
    assert!(core.fail(Fault::Transport("gone".to_owned())));
    assert!(!core.fail(Fault::Transport("again".to_owned())));
    assert!(!core.closed());
    assert_eq!(core.status(), ConnectionStatus::Unknown);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[test]
fn closing_an_idle_transport_is_silent() {
    let transport = Transport::new(TransportKind::Poll, connector(), None);
    let (closes, on_close) = counter();
    transport.on(EventKind::Close, on_close);
    transport.close();
    transport.close();
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    assert_eq!(transport.status(), ConnectionStatus::Closed);
}

#[test]
fn open_after_close_is_refused() {
    let core = Core::new(TransportKind::ServerPush, None);
    core.set_connecting();
    assert!(core.closed());
    assert!(!core.open());
    assert_eq!(core.status(), ConnectionStatus::Closed);
}
