//! Application layer for the participant.
//!
//! - **`handshake`** – The client half of the challenge–response exchange:
//!   builds the greeting, answers a numeric challenge, and decrypts every
//!   later message.  No I/O.

pub mod handshake;
