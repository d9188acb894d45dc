use super::*;
use crate::config::Config;
use crate::state::test_helpers::{drain_link, duplex_endpoint, test_hub};
use std::sync::Mutex as StdMutex;
use wire::{Envelope, MessageType};

fn recorder() -> (Handler, Arc<StdMutex<Vec<Event>>>) {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Handler = Arc::new(move |_hub: &Hub, _endpoint: &Endpoint, event: &Event| {
        sink.lock().expect("recorder lock").push(event.clone());
    });
    (handler, seen)
}

// =============================================================================
// send / drain
// =============================================================================

#[test]
fn send_writes_immediately_when_open() {
    let (endpoint, mut rx) = duplex_endpoint("a");
    assert!(endpoint.send("one"));
    assert_eq!(drain_link(&mut rx), vec!["one".to_owned()]);
    assert_eq!(endpoint.backlog_len(), 0);
}

#[test]
fn send_queues_when_not_open_and_drain_preserves_order() {
    let (endpoint, mut rx) = duplex_endpoint("a");
    endpoint.set_status(ConnectionStatus::Connecting);
    assert!(!endpoint.send("1"));
    assert!(!endpoint.send("2"));
    assert!(!endpoint.send("3"));
    assert!(drain_link(&mut rx).is_empty());

    endpoint.set_status(ConnectionStatus::Open);
    assert_eq!(endpoint.drain(), 3);
    assert_eq!(drain_link(&mut rx), vec!["1", "2", "3"]);
    assert_eq!(endpoint.backlog_len(), 0);
}

#[test]
fn send_stays_behind_non_empty_backlog() {
    let (endpoint, mut rx) = duplex_endpoint("a");
    endpoint.set_status(ConnectionStatus::Closed);
    endpoint.send("first");
    endpoint.set_status(ConnectionStatus::Open);

    assert!(!endpoint.send("second"));
    endpoint.drain();
    assert_eq!(drain_link(&mut rx), vec!["first", "second"]);
}

#[test]
fn failed_write_requeues_and_marks_closed() {
    let (endpoint, rx) = duplex_endpoint("a");
    drop(rx);
    assert!(!endpoint.send("lost?"));
    assert_eq!(endpoint.status(), ConnectionStatus::Closed);
    assert_eq!(endpoint.take_backlog(), vec!["lost?".to_owned()]);
}

#[test]
fn drain_keeps_unsent_tail_in_order() {
    let (endpoint, rx) = duplex_endpoint("a");
    endpoint.set_status(ConnectionStatus::Closed);
    endpoint.send("1");
    endpoint.send("2");
    drop(rx);
    endpoint.set_status(ConnectionStatus::Open);

    assert_eq!(endpoint.drain(), 0);
    assert_eq!(endpoint.take_backlog(), vec!["1", "2"]);
}

#[test]
fn poll_endpoint_always_queues() {
    let endpoint = Endpoint::new("p", TransportKind::Poll, Link::Poll);
    assert_eq!(endpoint.status(), ConnectionStatus::Open);
    assert!(!endpoint.send(Envelope::ping()));
    assert_eq!(endpoint.drain(), 0);
    assert_eq!(endpoint.backlog_len(), 1);
}

#[test]
fn requeue_front_keeps_salvaged_order_ahead_of_backlog() {
    let endpoint = Endpoint::new("p", TransportKind::Poll, Link::Poll);
    endpoint.send("later");
    endpoint.requeue_front(vec!["a".into(), "b".into()]);
    assert_eq!(endpoint.take_backlog(), vec!["a", "b", "later"]);
}

// =============================================================================
// adopt / close_link
// =============================================================================

#[test]
fn adopt_moves_state_and_clears_old() {
    let (old, _old_rx) = duplex_endpoint("s");
    let (new, _new_rx) = duplex_endpoint("s");
    let (handler, seen) = recorder();
    old.on(EventKind::Data, handler);
    old.set_status(ConnectionStatus::Closed);
    old.send("queued");
    old.join_channel("room");
    old.set_phase(Phase::Active);

    new.adopt(&old);

    assert_eq!(new.backlog_len(), 1);
    assert_eq!(new.channels(), vec!["room".to_owned()]);
    assert_eq!(new.phase(), Phase::Active);
    assert_eq!(old.backlog_len(), 0);
    assert!(old.channels().is_empty());

    let hub = test_hub();
    new.receive(&hub, "hi");
    old.receive(&hub, "ignored");
    assert_eq!(seen.lock().expect("lock").len(), 1);
}

#[test]
fn adopted_backlog_runs_ahead_of_new_sends() {
    let (old, _old_rx) = duplex_endpoint("s");
    let (new, mut new_rx) = duplex_endpoint("s");
    old.set_status(ConnectionStatus::Closed);
    old.send("old-1");
    old.send("old-2");
    new.set_status(ConnectionStatus::Connecting);
    new.send("new-1");

    new.adopt(&old);
    new.set_status(ConnectionStatus::Open);
    new.drain();
    assert_eq!(drain_link(&mut new_rx), vec!["old-1", "old-2", "new-1"]);
}

#[test]
fn close_link_is_idempotent() {
    let (endpoint, mut rx) = duplex_endpoint("a");
    assert!(endpoint.close_link());
    assert!(!endpoint.close_link());
    assert!(!endpoint.is_attached());
    assert_eq!(endpoint.status(), ConnectionStatus::Closed);
    // Sender dropped: the connection task sees end of stream.
    assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
}

// =============================================================================
// receive / emit
// =============================================================================

#[test]
fn handlers_run_in_registration_order() {
    let hub = test_hub();
    let (endpoint, _rx) = duplex_endpoint("a");
    let order = Arc::new(StdMutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        endpoint.on(
            EventKind::Open,
            Arc::new(move |_: &Hub, _: &Endpoint, _: &Event| order.lock().expect("lock").push(tag)),
        );
    }
    endpoint.emit(&hub, &Event::Open);
    assert_eq!(*order.lock().expect("lock"), vec!["first", "second", "third"]);
}

#[test]
fn receive_decodes_text_into_data_event() {
    let hub = test_hub();
    let (endpoint, _rx) = duplex_endpoint("a");
    let (handler, seen) = recorder();
    endpoint.on(EventKind::Data, handler);

    endpoint.receive(&hub, r#"{"type":"ping"}"#);
    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].envelope().map(|e| e.kind.clone()), Some(MessageType::Ping));
}

#[test]
fn receive_raw_in_strict_mode_emits_protocol_fault() {
    let hub = Hub::new(Config { strict_envelopes: true, ..Config::default() });
    let (endpoint, _rx) = duplex_endpoint("a");
    let (errors, seen_errors) = recorder();
    let (data, seen_data) = recorder();
    endpoint.on(EventKind::Error, errors);
    endpoint.on(EventKind::Data, data);

    endpoint.receive(&hub, vec![0xff_u8, 0xfe]);
    assert!(seen_data.lock().expect("lock").is_empty());
    let seen_errors = seen_errors.lock().expect("lock");
    assert!(matches!(seen_errors.as_slice(), [Event::Error(Fault::Protocol(_))]));
}

#[test]
fn receive_raw_in_lenient_mode_is_data() {
    let hub = test_hub();
    let (endpoint, _rx) = duplex_endpoint("a");
    let (handler, seen) = recorder();
    endpoint.on(EventKind::Data, handler);

    endpoint.receive(&hub, vec![0xff_u8]);
    assert!(matches!(seen.lock().expect("lock").as_slice(), [Event::Data(Decoded::Raw(_))]));
}
