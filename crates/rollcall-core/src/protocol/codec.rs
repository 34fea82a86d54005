//! Line codec for envelopes.
//!
//! Wire format:
//! ```text
//! <one JSON object>\n<one JSON object>\n...
//! ```
//! The newline is the record terminator.  `serde_json` escapes control
//! characters inside strings (`"\n"` becomes the two bytes `\` `n`), so a
//! payload containing line breaks can never split a record.
//!
//! Decoding failures are *soft*: the caller drops that one record, logs it,
//! and keeps reading the stream.

use thiserror::Error;

use crate::protocol::envelope::Envelope;

/// Record terminator on the wire.
pub const RECORD_TERMINATOR: char = '\n';

/// Errors that can occur while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The record is not valid JSON or lacks a required field.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encodes an envelope as one terminated record.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use rollcall_core::protocol::{decode_line, encode_line, Envelope};
///
/// let env = Envelope::with_timestamp("hello\nworld", "10.0.0.2", None, 5);
/// let line = encode_line(&env).unwrap();
/// assert_eq!(line.matches('\n').count(), 1);
/// assert_eq!(decode_line(&line).unwrap(), env);
/// ```
pub fn encode_line(envelope: &Envelope) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(envelope).map_err(ProtocolError::Encode)?;
    line.push(RECORD_TERMINATOR);
    Ok(line)
}

/// Decodes one record.  A trailing terminator (`\n` or `\r\n`) is tolerated.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedEnvelope`] if the record is empty, is not
/// JSON, or is missing `message`, `senderIp`, or `timestamp`.
pub fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    let record = line.trim_end_matches(['\r', '\n']);
    if record.trim().is_empty() {
        return Err(ProtocolError::MalformedEnvelope("empty record".to_string()));
    }
    serde_json::from_str(record).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
