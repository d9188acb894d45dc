use super::*;
use crate::config::Config;
use crate::state::test_helpers::{drain_link, envelopes, test_hub};
use tokio::sync::mpsc;
use wire::ConnectionStatus;

fn auth_hub() -> Hub {
    Hub::new(Config { detach_grace: std::time::Duration::ZERO, ..Config::default() })
}

fn connect(hub: &Hub, presented: Option<&str>) -> (Attached, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (attach(hub, presented, TransportKind::Duplex, Link::Duplex(tx)), rx)
}

fn client_says(hub: &Hub, endpoint: &Endpoint, envelope: Envelope) {
    endpoint.receive(hub, envelope.encode());
}

// =============================================================================
// FIRST CONTACT
// =============================================================================

#[test]
fn first_contact_sends_identity_then_auth_request() {
    let hub = auth_hub();
    let (attached, mut rx) = connect(&hub, None);

    assert!(!attached.resumed);
    assert_eq!(attached.endpoint.phase(), Phase::Authenticating);
    let sent = envelopes(&mut rx);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].kind, MessageType::Identity);
    assert_eq!(sent[0].value.as_ref().and_then(|v| v.as_str()), Some(attached.endpoint.id()));
    assert_eq!(sent[1].kind, MessageType::AuthReq);
    assert_eq!(hub.clients().len(), 1);
}

#[test]
fn disabled_auth_goes_straight_to_active() {
    let hub = test_hub();
    let (attached, mut rx) = connect(&hub, None);

    assert_eq!(attached.endpoint.phase(), Phase::Active);
    let kinds: Vec<_> = envelopes(&mut rx).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![MessageType::Identity]);
}

#[test]
fn unknown_presented_identity_gets_a_fresh_one() {
    let hub = auth_hub();
    let (attached, _rx) = connect(&hub, Some("stale-id"));

    assert!(!attached.resumed);
    assert_ne!(attached.endpoint.id(), "stale-id");
    assert!(hub.clients().get_client("stale-id").is_none());
}

// =============================================================================
// AUTH / MEMBERSHIP
// =============================================================================

#[test]
fn auth_response_subscribes_and_activates() {
    let hub = auth_hub();
    let (attached, mut rx) = connect(&hub, None);
    let endpoint = attached.endpoint;
    drain_link(&mut rx);

    client_says(&hub, &endpoint, Envelope::new(MessageType::AuthRes).with_value("lobby"));

    assert_eq!(endpoint.phase(), Phase::Active);
    assert!(hub.channels().contains("lobby", endpoint.id()));
    let sent = envelopes(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, MessageType::Success);
    assert_eq!(sent[0].channel.as_deref(), Some("lobby"));
}

#[test]
fn membership_change_before_auth_is_rejected() {
    let hub = auth_hub();
    let (attached, mut rx) = connect(&hub, None);
    drain_link(&mut rx);

    client_says(&hub, &attached.endpoint, Envelope::new(MessageType::Subscribe).with_channel("room"));

    assert!(!hub.channels().contains("room", attached.endpoint.id()));
    let sent = envelopes(&mut rx);
    assert_eq!(sent[0].kind, MessageType::Error);
    assert_eq!(sent[0].status_code, 401);
}

#[test]
fn subscribe_and_unsubscribe_while_active_are_acknowledged() {
    let hub = test_hub();
    let (attached, mut rx) = connect(&hub, None);
    let endpoint = attached.endpoint;
    drain_link(&mut rx);

    client_says(&hub, &endpoint, Envelope::new(MessageType::Subscribe).with_channel("room"));
    assert!(hub.channels().contains("room", endpoint.id()));
    client_says(&hub, &endpoint, Envelope::new(MessageType::Unsubscribe).with_channel("room"));
    assert!(!hub.channels().contains("room", endpoint.id()));

    let acks: Vec<_> = envelopes(&mut rx).into_iter().map(|e| (e.kind, e.channel)).collect();
    assert_eq!(
        acks,
        vec![
            (MessageType::Success, Some("room".to_owned())),
            (MessageType::Success, Some("room".to_owned())),
        ]
    );
}

#[test]
fn subscribe_without_channel_is_an_error() {
    let hub = test_hub();
    let (attached, mut rx) = connect(&hub, None);
    drain_link(&mut rx);

    client_says(&hub, &attached.endpoint, Envelope::new(MessageType::Subscribe));
    let sent = envelopes(&mut rx);
    assert_eq!(sent[0].kind, MessageType::Error);
    assert_eq!(sent[0].status_code, 400);
}

// =============================================================================
// CONTROL TRAFFIC
// =============================================================================

#[test]
fn ping_gets_pong() {
    let hub = auth_hub();
    let (attached, mut rx) = connect(&hub, None);
    drain_link(&mut rx);

    client_says(&hub, &attached.endpoint, Envelope::ping());
    assert_eq!(envelopes(&mut rx)[0].kind, MessageType::Pong);
}

#[test]
fn channel_message_is_relayed_to_members() {
    let hub = test_hub();
    let (sender, mut sender_rx) = connect(&hub, None);
    let (listener, mut listener_rx) = connect(&hub, None);
    let (outsider, mut outsider_rx) = connect(&hub, None);
    hub.channels().subscribe(&sender.endpoint, "room");
    hub.channels().subscribe(&listener.endpoint, "room");
    for rx in [&mut sender_rx, &mut listener_rx, &mut outsider_rx] {
        drain_link(rx);
    }

    client_says(&hub, &sender.endpoint, Envelope::message("hi all").with_channel("room"));

    let got = envelopes(&mut listener_rx);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value, Some(serde_json::json!("hi all")));
    assert_eq!(envelopes(&mut sender_rx).len(), 1);
    assert!(drain_link(&mut outsider_rx).is_empty());
    drop(outsider);
}

#[test]
fn close_socket_unregisters_and_leaves_channels() {
    let hub = test_hub();
    let (attached, _rx) = connect(&hub, None);
    let endpoint = attached.endpoint;
    hub.channels().subscribe(&endpoint, "room");

    client_says(&hub, &endpoint, Envelope::new(MessageType::CloseSocket));

    assert!(hub.clients().get_client(endpoint.id()).is_none());
    assert_eq!(hub.channels().members("room"), Some(Vec::new()));
    assert_eq!(endpoint.phase(), Phase::Closed);
    assert!(!endpoint.is_attached());
}

// =============================================================================
// RECONNECT
// =============================================================================

#[test]
fn reconnect_resumes_identity_phase_and_backlog() {
    let hub = test_hub();
    let (first, first_rx) = connect(&hub, None);
    let id = first.endpoint.id().to_owned();
    hub.channels().subscribe(&first.endpoint, "room");

    // Link dies without the hub noticing yet; the next send is queued.
    drop(first_rx);
    first.endpoint.send("while-away");
    assert_eq!(first.endpoint.status(), ConnectionStatus::Closed);

    let (second, mut second_rx) = connect(&hub, Some(id.as_str()));
    assert!(second.resumed);
    assert_eq!(second.endpoint.id(), id);
    assert_eq!(second.endpoint.phase(), Phase::Active);
    assert_eq!(drain_link(&mut second_rx), vec!["while-away"]);
    assert!(hub.channels().contains("room", &id));
    assert!(!first.endpoint.is_attached());
    assert_eq!(hub.clients().len(), 1);
}

#[test]
fn reconnect_while_authenticating_repeats_auth_request() {
    let hub = auth_hub();
    let (first, _first_rx) = connect(&hub, None);
    let id = first.endpoint.id().to_owned();

    let (second, mut second_rx) = connect(&hub, Some(id.as_str()));
    assert!(second.resumed);
    assert_eq!(second.endpoint.phase(), Phase::Authenticating);
    let kinds: Vec<_> = envelopes(&mut second_rx).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![MessageType::AuthReq]);
}

#[test]
fn control_handler_survives_reconnect() {
    let hub = test_hub();
    let (first, _first_rx) = connect(&hub, None);
    let id = first.endpoint.id().to_owned();
    let (second, mut second_rx) = connect(&hub, Some(id.as_str()));

    client_says(&hub, &second.endpoint, Envelope::ping());
    let kinds: Vec<_> = envelopes(&mut second_rx).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![MessageType::Pong]);
}
