//! The [`Envelope`]: the atomic unit exchanged over a connection channel.
//!
//! # Wire shape
//!
//! One envelope is one JSON object.  Field names follow the deployed
//! classroom app so that existing peers interoperate:
//!
//! ```json
//! {"message":"4821","senderIp":"192.168.49.1","studentId":"816032311","timestamp":1729240000000}
//! ```
//!
//! | JSON field  | Rust field        | Required |
//! |-------------|-------------------|----------|
//! | `message`   | `payload`         | yes      |
//! | `senderIp`  | `sender_address`  | yes      |
//! | `studentId` | `participant_id`  | no       |
//! | `timestamp` | `timestamp_ms`    | yes      |
//!
//! Unknown fields (older peers also send `deviceAddress`) are ignored.
//!
//! # Immutability
//!
//! Fields are private and only readable through accessors.  A reply is always
//! a new envelope; the builder-style `with_*` methods consume `self` and
//! return a fresh value rather than mutating one that may already be shared.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::identity::Identity;

/// Greeting payload that opens the challenge–response handshake.
pub const HANDSHAKE_GREETING: &str = "I am here";

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "message")]
    payload: String,
    #[serde(rename = "senderIp")]
    sender_address: String,
    #[serde(
        rename = "studentId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    participant_id: Option<Identity>,
    #[serde(rename = "timestamp")]
    timestamp_ms: u64,
}

impl Envelope {
    /// Creates an envelope stamped with the current wall-clock time.
    pub fn new(
        payload: impl Into<String>,
        sender_address: impl Into<String>,
        participant_id: Option<Identity>,
    ) -> Self {
        Self::with_timestamp(payload, sender_address, participant_id, now_ms())
    }

    /// Creates an envelope with an explicit timestamp (ms since the epoch).
    pub fn with_timestamp(
        payload: impl Into<String>,
        sender_address: impl Into<String>,
        participant_id: Option<Identity>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            payload: payload.into(),
            sender_address: sender_address.into(),
            participant_id,
            timestamp_ms,
        }
    }

    /// Creates the plaintext greeting that opens a handshake.
    pub fn greeting(sender_address: impl Into<String>, identity: Identity) -> Self {
        Self::new(HANDSHAKE_GREETING, sender_address, Some(identity))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    pub fn participant_id(&self) -> Option<&Identity> {
        self.participant_id.as_ref()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Returns `true` if the payload is exactly the handshake greeting.
    pub fn is_greeting(&self) -> bool {
        self.payload == HANDSHAKE_GREETING
    }

    /// Returns a copy carrying a different sender address.
    ///
    /// Used by the host, which re-stamps every outgoing envelope with its own
    /// address for the connection it is sent on.
    #[must_use]
    pub fn with_sender_address(self, sender_address: impl Into<String>) -> Self {
        Self {
            sender_address: sender_address.into(),
            ..self
        }
    }

    /// Returns a copy carrying a different payload but the same sender,
    /// identity, and timestamp.
    #[must_use]
    pub fn with_payload(self, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before 1970.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
