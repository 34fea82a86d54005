//! Host-side handshake: the per-connection challenge–response state machine.
//!
//! This module is pure: it never touches a socket or the roster.  Each
//! connection worker owns one [`ConnectionState`], feeds every received
//! [`Envelope`] into [`ConnectionState::on_envelope`], and carries out the
//! returned [`Action`].
//!
//! ```text
//!                 greeting, id permitted
//! Unauthenticated ──────────────────────► Challenged ──┐ greeting: new challenge
//!        │                                    │ ◄──────┘
//!        │ id not permitted                   │ decrypt(payload, id) == R
//!        ▼                                    ▼
//!      Closed ◄───── wrong echo ───────── Authenticated ──► Deliver(envelope)
//! ```
//!
//! The pending challenge is kept here, on the connection, as well as in the
//! roster; verification compares against this connection's own value so two
//! connections racing for one identity cannot answer each other's challenge.

use std::fmt;

use rollcall_core::{AuthorizedSet, Envelope, HandshakeFailure, Identity, IdentityCipher};
use tracing::debug;

/// Source of challenge values.
///
/// Implementations must return a value in `1..100_000`.
#[cfg_attr(test, mockall::automock)]
pub trait ChallengeSource: Send + Sync {
    fn next_challenge(&self) -> u32;
}

/// Where a connection stands in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Challenged,
    Authenticated,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Challenged => "challenged",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the connection worker must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Record the challenge in the roster and send it in plaintext.
    SendChallenge { identity: Identity, challenge: u32 },
    /// The echo verified: bind the identity to this channel.
    Bind { identity: Identity },
    /// Forward an authenticated envelope to the application.
    Deliver(Envelope),
    /// Close the channel and drop every roster entry this connection owns.
    Evict {
        identity: Option<Identity>,
        reason: HandshakeFailure,
    },
    /// Nothing to do; the reason is logged by the worker.
    Ignore { reason: &'static str },
}

/// Handshake state for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    identity: Option<Identity>,
    phase: Phase,
    pending_challenge: Option<u32>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            identity: None,
            phase: Phase::Unauthenticated,
            pending_challenge: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The identity this connection has claimed, once it has claimed one.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn pending_challenge(&self) -> Option<u32> {
        self.pending_challenge
    }

    /// Moves to [`Phase::Closed`].  Every later envelope is ignored.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.pending_challenge = None;
    }

    /// Applies one received envelope and returns the action to carry out.
    pub fn on_envelope(
        &mut self,
        envelope: Envelope,
        permitted: &AuthorizedSet,
        challenges: &dyn ChallengeSource,
    ) -> Action {
        if self.phase == Phase::Closed {
            return Action::Ignore {
                reason: "connection already closed",
            };
        }

        let Some(claimed) = envelope.participant_id().cloned() else {
            return Action::Ignore {
                reason: "envelope carries no participant id",
            };
        };

        if !permitted.contains(&claimed) {
            return self.evict(Some(claimed), HandshakeFailure::NotAuthorized);
        }

        match &self.identity {
            Some(bound) if *bound != claimed => {
                let bound = bound.clone();
                return self.evict(Some(bound), HandshakeFailure::IdentityMismatch);
            }
            Some(_) => {}
            None => self.identity = Some(claimed.clone()),
        }

        match (self.phase, envelope.is_greeting()) {
            (Phase::Unauthenticated | Phase::Challenged, true) => {
                let challenge = challenges.next_challenge();
                self.pending_challenge = Some(challenge);
                self.phase = Phase::Challenged;
                debug!(identity = %claimed, "issuing challenge");
                Action::SendChallenge {
                    identity: claimed,
                    challenge,
                }
            }
            (Phase::Challenged, false) => self.verify_echo(claimed, envelope.payload()),
            (Phase::Unauthenticated, false) => Action::Ignore {
                reason: "expected greeting before any other message",
            },
            (Phase::Authenticated, true) => Action::Ignore {
                reason: "greeting repeated after authentication",
            },
            (Phase::Authenticated, false) => Action::Deliver(envelope),
            (Phase::Closed, _) => Action::Ignore {
                reason: "connection already closed",
            },
        }
    }

    fn verify_echo(&mut self, identity: Identity, payload: &str) -> Action {
        let Some(expected) = self.pending_challenge else {
            return Action::Ignore {
                reason: "no challenge pending",
            };
        };

        let decrypted = match IdentityCipher::for_identity(&identity).decrypt(payload) {
            Ok(text) => text,
            Err(e) => {
                debug!(%identity, error = %e, "challenge response did not decrypt");
                return self.evict(Some(identity), HandshakeFailure::Decryption);
            }
        };

        // Exact text match: the echo must be the challenge's decimal form.
        if decrypted != expected.to_string() {
            return self.evict(Some(identity), HandshakeFailure::ChallengeMismatch);
        }

        self.pending_challenge = None;
        self.phase = Phase::Authenticated;
        Action::Bind { identity }
    }

    fn evict(&mut self, identity: Option<Identity>, reason: HandshakeFailure) -> Action {
        self.close();
        Action::Evict { identity, reason }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::crypto::encrypt;

    fn id(s: &str) -> Identity {
        Identity::from(s)
    }

    fn class() -> AuthorizedSet {
        ["A", "B"].into_iter().collect()
    }

    fn fixed(value: u32) -> MockChallengeSource {
        let mut source = MockChallengeSource::new();
        source.expect_next_challenge().return_const(value);
        source
    }

    fn greeting(identity: &str) -> Envelope {
        Envelope::greeting("10.0.0.2", id(identity))
    }

    fn from(identity: &str, payload: &str) -> Envelope {
        Envelope::new(payload, "10.0.0.2", Some(id(identity)))
    }

    #[test]
    fn test_greeting_from_permitted_identity_issues_challenge() {
        // Arrange
        let mut conn = ConnectionState::new();

        // Act
        let action = conn.on_envelope(greeting("A"), &class(), &fixed(4821));

        // Assert
        assert_eq!(
            action,
            Action::SendChallenge {
                identity: id("A"),
                challenge: 4821
            }
        );
        assert_eq!(conn.phase(), Phase::Challenged);
        assert_eq!(conn.pending_challenge(), Some(4821));
    }

    #[test]
    fn test_unpermitted_identity_is_evicted_without_challenge() {
        let mut conn = ConnectionState::new();
        let mut source = MockChallengeSource::new();
        source.expect_next_challenge().never();

        let action = conn.on_envelope(greeting("Z"), &class(), &source);

        assert_eq!(
            action,
            Action::Evict {
                identity: Some(id("Z")),
                reason: HandshakeFailure::NotAuthorized
            }
        );
        assert_eq!(conn.phase(), Phase::Closed);
    }

    #[test]
    fn test_correct_echo_authenticates() {
        let mut conn = ConnectionState::new();
        let source = fixed(4821);
        conn.on_envelope(greeting("A"), &class(), &source);

        let action = conn.on_envelope(from("A", &encrypt("4821", &id("A"))), &class(), &source);

        assert_eq!(action, Action::Bind { identity: id("A") });
        assert_eq!(conn.phase(), Phase::Authenticated);
        assert_eq!(conn.pending_challenge(), None);
    }

    #[test]
    fn test_wrong_value_is_challenge_mismatch() {
        let mut conn = ConnectionState::new();
        let source = fixed(4821);
        conn.on_envelope(greeting("A"), &class(), &source);

        let action = conn.on_envelope(from("A", &encrypt("1234", &id("A"))), &class(), &source);

        assert_eq!(
            action,
            Action::Evict {
                identity: Some(id("A")),
                reason: HandshakeFailure::ChallengeMismatch
            }
        );
    }

    #[test]
    fn test_echo_with_same_number_but_different_text_is_challenge_mismatch() {
        for echo in ["04821", " 4821\n", "+4821"] {
            // Arrange
            let mut conn = ConnectionState::new();
            let source = fixed(4821);
            conn.on_envelope(greeting("A"), &class(), &source);

            // Act
            let action = conn.on_envelope(from("A", &encrypt(echo, &id("A"))), &class(), &source);

            // Assert
            assert_eq!(
                action,
                Action::Evict {
                    identity: Some(id("A")),
                    reason: HandshakeFailure::ChallengeMismatch
                },
                "echo {echo:?} must not authenticate"
            );
            assert_eq!(conn.phase(), Phase::Closed);
        }
    }

    #[test]
    fn test_plaintext_echo_is_decryption_failure() {
        let mut conn = ConnectionState::new();
        let source = fixed(4821);
        conn.on_envelope(greeting("A"), &class(), &source);

        let action = conn.on_envelope(from("A", "4821"), &class(), &source);

        assert_eq!(
            action,
            Action::Evict {
                identity: Some(id("A")),
                reason: HandshakeFailure::Decryption
            }
        );
        assert_eq!(conn.phase(), Phase::Closed);
    }

    #[test]
    fn test_repeated_greeting_replaces_challenge() {
        // Arrange
        let mut conn = ConnectionState::new();
        let mut source = MockChallengeSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_next_challenge()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(111u32);
        source
            .expect_next_challenge()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(222u32);

        // Act
        conn.on_envelope(greeting("A"), &class(), &source);
        conn.on_envelope(greeting("A"), &class(), &source);

        // Assert: only the latest challenge verifies.
        assert_eq!(conn.pending_challenge(), Some(222));
        let action = conn.on_envelope(from("A", &encrypt("222", &id("A"))), &class(), &source);
        assert_eq!(action, Action::Bind { identity: id("A") });
    }

    #[test]
    fn test_message_before_greeting_is_ignored() {
        let mut conn = ConnectionState::new();
        let action = conn.on_envelope(from("A", "hello"), &class(), &fixed(1));
        assert!(matches!(action, Action::Ignore { .. }));
        assert_eq!(conn.phase(), Phase::Unauthenticated);
    }

    #[test]
    fn test_missing_participant_id_is_ignored() {
        let mut conn = ConnectionState::new();
        let action = conn.on_envelope(Envelope::new("I am here", "h", None), &class(), &fixed(1));
        assert!(matches!(action, Action::Ignore { .. }));
        assert_eq!(conn.identity(), None);
    }

    #[test]
    fn test_switching_identity_mid_handshake_evicts() {
        let mut conn = ConnectionState::new();
        let source = fixed(4821);
        conn.on_envelope(greeting("A"), &class(), &source);

        let action = conn.on_envelope(greeting("B"), &class(), &source);

        assert_eq!(
            action,
            Action::Evict {
                identity: Some(id("A")),
                reason: HandshakeFailure::IdentityMismatch
            }
        );
    }

    #[test]
    fn test_authenticated_messages_are_delivered_verbatim() {
        // Arrange
        let mut conn = ConnectionState::new();
        let source = fixed(4821);
        conn.on_envelope(greeting("A"), &class(), &source);
        conn.on_envelope(from("A", &encrypt("4821", &id("A"))), &class(), &source);
        let chat = from("A", &encrypt("hi class", &id("A")));

        // Act
        let action = conn.on_envelope(chat.clone(), &class(), &source);

        // Assert
        assert_eq!(action, Action::Deliver(chat));
    }

    #[test]
    fn test_greeting_after_authentication_is_not_rechallenged() {
        let mut conn = ConnectionState::new();
        let mut source = MockChallengeSource::new();
        source.expect_next_challenge().times(1).return_const(5u32);
        conn.on_envelope(greeting("A"), &class(), &source);
        conn.on_envelope(from("A", &encrypt("5", &id("A"))), &class(), &source);

        let action = conn.on_envelope(greeting("A"), &class(), &source);

        assert!(matches!(action, Action::Ignore { .. }));
        assert_eq!(conn.phase(), Phase::Authenticated);
    }

    #[test]
    fn test_closed_connection_ignores_everything() {
        let mut conn = ConnectionState::new();
        conn.close();
        let action = conn.on_envelope(greeting("A"), &class(), &fixed(1));
        assert!(matches!(action, Action::Ignore { .. }));
    }

    #[test]
    fn test_no_message_sequence_authenticates_unpermitted_identity() {
        let source = fixed(7);
        let attempts = [
            greeting("Z"),
            from("Z", &encrypt("7", &id("Z"))),
            from("Z", "7"),
            greeting("Z"),
        ];
        let mut conn = ConnectionState::new();
        for envelope in attempts {
            let action = conn.on_envelope(envelope, &class(), &source);
            assert!(!matches!(action, Action::Bind { .. } | Action::SendChallenge { .. }));
        }
        assert_ne!(conn.phase(), Phase::Authenticated);
    }
}
