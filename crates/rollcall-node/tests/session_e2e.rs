//! End-to-end tests: two link controllers, one hosting and one joining, over
//! loopback.
//!
//! The host binds port 0 and the participant is configured with whatever
//! port the host actually got, standing in for the fixed group-owner port.

use std::time::Duration;

use rollcall_client::ClientError;
use rollcall_core::crypto::decrypt;
use rollcall_core::{AuthorizedSet, EventStream, HandshakeFailure, Identity, SessionEvent};
use rollcall_node::application::{LinkController, LinkError, LinkEvent};
use rollcall_node::domain::LinkSettings;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn settings(port: u16, identity: Option<&str>) -> LinkSettings {
    LinkSettings {
        port,
        host_address: "127.0.0.1".parse().unwrap(),
        authorized: ["816032311", "816117992"]
            .into_iter()
            .collect::<AuthorizedSet>(),
        identity: identity.map(Identity::from),
        handshake_timeout: Duration::from_secs(5),
    }
}

async fn start_host() -> (LinkController, EventStream, u16) {
    let (mut host, events) = LinkController::new(settings(0, None));
    host.handle(LinkEvent::Established {
        is_host: true,
        host_address: "127.0.0.1".to_string(),
    })
    .await
    .unwrap();
    let port = host.host_session().unwrap().local_addr().port();
    (host, events, port)
}

async fn next_event(events: &mut EventStream) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream ended")
}

#[tokio::test]
async fn test_authorized_participant_joins_and_chats_both_ways() {
    // Arrange
    let (host, mut host_events, port) = start_host().await;
    let alice = Identity::from("816032311");
    let (mut participant, mut participant_events) =
        LinkController::new(settings(port, Some("816032311")));

    // Act: join
    participant
        .link_established(false, "127.0.0.1")
        .await
        .unwrap();

    // Assert: the host marks attendance
    assert_eq!(
        next_event(&mut host_events).await,
        SessionEvent::AttendanceChanged(vec![alice.clone()])
    );

    // Participant → host arrives sealed under the participant's key.
    participant
        .client_session()
        .unwrap()
        .send_text("present")
        .await
        .unwrap();
    let SessionEvent::Message(inbound) = next_event(&mut host_events).await else {
        panic!("expected a message at the host");
    };
    assert_eq!(inbound.participant_id(), Some(&alice));
    assert_eq!(decrypt(inbound.payload(), &alice).unwrap(), "present");

    // Host → participant arrives opened.
    host.host_session()
        .unwrap()
        .send_text_to(&alice, "quiz at 10")
        .await
        .unwrap();
    let SessionEvent::Message(outbound) = next_event(&mut participant_events).await else {
        panic!("expected a message at the participant");
    };
    assert_eq!(outbound.payload(), "quiz at 10");
    assert_eq!(outbound.sender_address(), "127.0.0.1");

    participant.link_lost().await;
}

#[tokio::test]
async fn test_unlisted_participant_is_rejected() {
    // Arrange
    let (host, _host_events, port) = start_host().await;
    let (mut intruder, mut intruder_events) =
        LinkController::new(settings(port, Some("999999999")));

    // Act
    let result = intruder.link_established(false, "127.0.0.1").await;

    // Assert
    assert!(matches!(result, Err(LinkError::Client(_))));
    assert_eq!(
        next_event(&mut intruder_events).await,
        SessionEvent::HandshakeFailed {
            identity: Some(Identity::from("999999999")),
            reason: HandshakeFailure::ChannelClosed,
        }
    );
    assert!(intruder.active().is_none());
    assert!(host.host_session().unwrap().attendees().is_empty());
}

#[tokio::test]
async fn test_host_link_lost_disconnects_participant() {
    // Arrange
    let (mut host, mut host_events, port) = start_host().await;
    let (mut participant, mut participant_events) =
        LinkController::new(settings(port, Some("816117992")));
    participant
        .link_established(false, "127.0.0.1")
        .await
        .unwrap();
    next_event(&mut host_events).await;

    // Act
    host.handle(LinkEvent::Lost).await.unwrap();

    // Assert
    assert_eq!(
        next_event(&mut participant_events).await,
        SessionEvent::Disconnected
    );
    assert!(participant.client_session().unwrap().is_closed());
    participant.link_lost().await;
}

#[tokio::test]
async fn test_participant_link_lost_removes_attendee() {
    let (host, mut host_events, port) = start_host().await;
    let (mut participant, _participant_events) =
        LinkController::new(settings(port, Some("816117992")));
    participant
        .link_established(false, "127.0.0.1")
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut host_events).await,
        SessionEvent::AttendanceChanged(vec![Identity::from("816117992")])
    );

    participant.link_lost().await;

    assert_eq!(
        next_event(&mut host_events).await,
        SessionEvent::AttendanceChanged(vec![])
    );
    assert!(host.host_session().unwrap().attendees().is_empty());
}

#[tokio::test]
async fn test_join_with_nothing_listening_reports_connect_failure() {
    // Arrange: take a free port, then release it.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let (mut participant, mut events) = LinkController::new(settings(port, Some("816032311")));

    // Act
    let result = participant.link_established(false, "127.0.0.1").await;

    // Assert
    assert!(matches!(
        result,
        Err(LinkError::Client(ClientError::ConnectFailed { .. }))
    ));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::HandshakeFailed {
            identity: Some(Identity::from("816032311")),
            reason: HandshakeFailure::ConnectFailed,
        }
    );
}
