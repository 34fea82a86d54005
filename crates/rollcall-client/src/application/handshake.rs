//! Client-side handshake state machine.
//!
//! ```text
//! Connecting ──greeting sent──► AwaitingChallenge ──numeric R──► Authenticated
//!                                      │                              │
//!                                      └─ anything else: ignored      └─ decrypt & deliver
//! ```
//!
//! Like the host's machine this one is pure: it takes envelopes in and hands
//! back the envelope to send or the decrypted envelope to deliver.  The
//! network layer owns the socket and the timeout.

use rollcall_core::{Envelope, Identity, IdentityCipher};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Connecting,
    AwaitingChallenge,
    Authenticated,
}

/// What the session must do with a received envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Send this envelope back to the host (the encrypted challenge echo).
    Respond(Envelope),
    /// Hand this envelope, payload already decrypted, to the application.
    Deliver(Envelope),
    /// Drop the envelope.
    Ignore(&'static str),
}

/// Handshake state for the client's single connection.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    identity: Identity,
    cipher: IdentityCipher,
    phase: ClientPhase,
}

impl ClientHandshake {
    pub fn new(identity: Identity) -> Self {
        let cipher = IdentityCipher::for_identity(&identity);
        Self {
            identity,
            cipher,
            phase: ClientPhase::Connecting,
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == ClientPhase::Authenticated
    }

    /// Builds the plaintext greeting and moves to `AwaitingChallenge`.
    pub fn greeting(&mut self, sender_address: impl Into<String>) -> Envelope {
        self.phase = ClientPhase::AwaitingChallenge;
        Envelope::greeting(sender_address, self.identity.clone())
    }

    /// Encrypts `text` under this participant's key, ready to send.
    pub fn seal(&self, text: &str, sender_address: impl Into<String>) -> Envelope {
        Envelope::new(
            self.cipher.encrypt(text),
            sender_address,
            Some(self.identity.clone()),
        )
    }

    /// Applies one envelope received from the host.
    pub fn on_envelope(&mut self, envelope: Envelope, sender_address: &str) -> ClientAction {
        match self.phase {
            ClientPhase::Connecting => ClientAction::Ignore("greeting not sent yet"),
            ClientPhase::AwaitingChallenge => {
                let challenge = envelope.payload().trim();
                if challenge.is_empty() || !challenge.bytes().all(|b| b.is_ascii_digit()) {
                    return ClientAction::Ignore("expected a numeric challenge");
                }
                let echo = self.seal(challenge, sender_address);
                self.phase = ClientPhase::Authenticated;
                ClientAction::Respond(echo)
            }
            ClientPhase::Authenticated => match self.cipher.decrypt(envelope.payload()) {
                Ok(text) => ClientAction::Deliver(envelope.with_payload(text)),
                Err(e) => {
                    warn!(identity = %self.identity, "dropping message that did not decrypt: {e}");
                    ClientAction::Ignore("payload did not decrypt")
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::crypto::{decrypt, encrypt};

    fn host_says(payload: &str) -> Envelope {
        Envelope::new(payload, "192.168.49.1", Some(Identity::from("A")))
    }

    #[test]
    fn test_greeting_moves_to_awaiting_challenge() {
        let mut hs = ClientHandshake::new(Identity::from("A"));
        let greeting = hs.greeting("10.0.0.2");
        assert!(greeting.is_greeting());
        assert_eq!(greeting.participant_id(), Some(&Identity::from("A")));
        assert_eq!(hs.phase(), ClientPhase::AwaitingChallenge);
    }

    #[test]
    fn test_numeric_challenge_is_echoed_encrypted() {
        // Arrange
        let a = Identity::from("A");
        let mut hs = ClientHandshake::new(a.clone());
        hs.greeting("10.0.0.2");

        // Act
        let action = hs.on_envelope(host_says("4821"), "10.0.0.2");

        // Assert
        let ClientAction::Respond(echo) = action else {
            panic!("expected an echo, got {action:?}");
        };
        assert_eq!(decrypt(echo.payload(), &a).unwrap(), "4821");
        assert_eq!(echo.sender_address(), "10.0.0.2");
        assert!(hs.is_authenticated());
    }

    #[test]
    fn test_non_numeric_message_while_awaiting_is_ignored() {
        let mut hs = ClientHandshake::new(Identity::from("A"));
        hs.greeting("10.0.0.2");

        let action = hs.on_envelope(host_says("welcome!"), "10.0.0.2");

        assert!(matches!(action, ClientAction::Ignore(_)));
        assert_eq!(hs.phase(), ClientPhase::AwaitingChallenge);
    }

    #[test]
    fn test_authenticated_messages_are_decrypted() {
        let a = Identity::from("A");
        let mut hs = ClientHandshake::new(a.clone());
        hs.greeting("10.0.0.2");
        hs.on_envelope(host_says("7"), "10.0.0.2");

        let action = hs.on_envelope(host_says(&encrypt("quiz at 10", &a)), "10.0.0.2");

        let ClientAction::Deliver(env) = action else {
            panic!("expected delivery, got {action:?}");
        };
        assert_eq!(env.payload(), "quiz at 10");
        assert_eq!(env.sender_address(), "192.168.49.1");
    }

    #[test]
    fn test_undecryptable_message_is_dropped() {
        let mut hs = ClientHandshake::new(Identity::from("A"));
        hs.greeting("10.0.0.2");
        hs.on_envelope(host_says("7"), "10.0.0.2");

        let action = hs.on_envelope(host_says("plain text"), "10.0.0.2");

        assert!(matches!(action, ClientAction::Ignore(_)));
        assert!(hs.is_authenticated());
    }

    #[test]
    fn test_envelope_before_greeting_is_ignored() {
        let mut hs = ClientHandshake::new(Identity::from("A"));
        assert!(matches!(
            hs.on_envelope(host_says("4821"), "10.0.0.2"),
            ClientAction::Ignore(_)
        ));
    }
}
