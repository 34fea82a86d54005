//! Protocol module containing the envelope type and the line codec.

pub mod codec;
pub mod envelope;

pub use codec::{decode_line, encode_line, ProtocolError, RECORD_TERMINATOR};
pub use envelope::{now_ms, Envelope, HANDSHAKE_GREETING};
