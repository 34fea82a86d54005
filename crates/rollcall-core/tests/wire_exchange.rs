//! Integration tests for the core wire pieces working together.
//!
//! These tests drive two [`Channel`]s over real loopback TCP and perform the
//! handshake exchange by hand, without the host or client session logic, to
//! check that the codec, the crypto binding, and the channel agree with each
//! other through the public API only.

use rollcall_core::crypto::{decrypt, encrypt};
use rollcall_core::protocol::decode_line;
use rollcall_core::{Channel, ChannelError, Envelope, Identity};
use tokio::net::TcpListener;

async fn channel_pair() -> (Channel, Channel) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(Channel::connect(addr), listener.accept());
    let host = Channel::new(accepted.unwrap().0).unwrap();
    (client.unwrap(), host)
}

/// The challenge exchange from the protocol walkthrough, by hand:
/// greeting → plaintext challenge → encrypted echo → host verifies.
#[tokio::test]
async fn test_manual_challenge_exchange_verifies_on_host() {
    // Arrange
    let (mut client, mut host) = channel_pair().await;
    let a = Identity::from("A");

    // Step 1: client greets.
    client
        .send(&Envelope::greeting("10.0.0.2", a.clone()))
        .await
        .unwrap();
    let greeting = host.receive().await.unwrap();
    assert!(greeting.is_greeting());

    // Step 2: host issues challenge "4821" in plaintext.
    host.send(&Envelope::new("4821", "192.168.49.1", Some(a.clone())))
        .await
        .unwrap();
    let challenge = client.receive().await.unwrap();
    assert_eq!(challenge.payload(), "4821");

    // Step 3: client echoes it encrypted under its own identity.
    client
        .send(&Envelope::new(
            encrypt(challenge.payload(), &a),
            "10.0.0.2",
            Some(a.clone()),
        ))
        .await
        .unwrap();
    let response = host.receive().await.unwrap();

    // Assert: host decrypts with the claimed identity and gets the challenge back.
    let claimed = response.participant_id().unwrap();
    assert_eq!(decrypt(response.payload(), claimed).unwrap(), "4821");
}

/// Records produced by legacy Android peers must decode, and records we
/// produce must carry the fields those peers read.
#[test]
fn test_legacy_record_shapes_are_compatible() {
    let legacy = r#"{"message":"hello","senderIp":"192.168.49.1","studentId":"816117992","timestamp":1700000000000}"#;
    let env = decode_line(legacy).unwrap();
    assert_eq!(env.payload(), "hello");

    let ours = serde_json::to_value(&env).unwrap();
    for field in ["message", "senderIp", "studentId", "timestamp"] {
        assert!(ours.get(field).is_some(), "missing field {field}");
    }
}

#[tokio::test]
async fn test_host_close_is_seen_as_closed_by_client() {
    let (mut client, host) = channel_pair().await;
    host.close();
    assert!(matches!(client.receive().await, Err(ChannelError::Closed)));
}
