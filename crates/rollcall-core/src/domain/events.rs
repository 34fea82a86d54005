//! Events emitted by a session to the consuming application.
//!
//! Sessions never call back into application code directly.  Instead they
//! push [`SessionEvent`]s onto an unbounded tokio channel from their own
//! worker tasks; the application drains the receiver on whatever execution
//! context it owns (a UI thread, a CLI loop, a test).
//!
//! ```text
//! connection workers ──► EventSink ──► application loop
//!      (tokio tasks)    (mpsc tx)       (rx.recv().await)
//! ```

use std::fmt;

use tokio::sync::mpsc;

use crate::domain::identity::Identity;
use crate::protocol::envelope::Envelope;

/// Why a handshake did not reach the authenticated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The claimed identity is not in the Authorized Set.
    NotAuthorized,
    /// The challenge response decrypted, but to the wrong value.
    ChallengeMismatch,
    /// The challenge response could not be decrypted at all.
    Decryption,
    /// A connection switched the identity it claims mid-session.
    IdentityMismatch,
    /// The channel closed before the handshake completed.
    ChannelClosed,
    /// The host did not issue a challenge in time (client side).
    Timeout,
    /// The host could not be reached (client side).
    ConnectFailed,
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotAuthorized => "identity is not on the class roster",
            Self::ChallengeMismatch => "challenge response did not match",
            Self::Decryption => "challenge response could not be decrypted",
            Self::IdentityMismatch => "connection changed its claimed identity",
            Self::ChannelClosed => "channel closed before authentication completed",
            Self::Timeout => "host did not issue a challenge in time",
            Self::ConnectFailed => "host could not be reached",
        };
        f.write_str(text)
    }
}

/// A notification from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A post-handshake application envelope.
    ///
    /// On the host the envelope is forwarded verbatim (payload still
    /// encrypted); on the client the payload has already been decrypted.
    Message(Envelope),
    /// The host's ordered attendee list changed.  Carries the full snapshot.
    AttendanceChanged(Vec<Identity>),
    /// A handshake was abandoned; `identity` is `None` when no identity was
    /// ever claimed.
    HandshakeFailed {
        identity: Option<Identity>,
        reason: HandshakeFailure,
    },
    /// The client's authenticated channel to the host closed.
    Disconnected,
}

/// Sending half of the session event channel.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of the session event channel.
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
