//! rollcall-client library entry point.
//!
//! # What does the participant side do? (for beginners)
//!
//! A participant is one student's device.  It:
//!
//! 1. Connects to the host over TCP and sends the greeting with its identity.
//! 2. Receives a random number in plaintext and sends it back encrypted under
//!    a key derived from its identity.  Only a participant that knows the
//!    identity-to-key rule can answer correctly.
//! 3. From then on exchanges chat messages encrypted the same way, and
//!    delivers decrypted messages to the application as `SessionEvent`s.

/// Application layer: the pure client handshake.
pub mod application;

/// Infrastructure layer: the TCP session.
pub mod infrastructure;

pub use application::handshake::{ClientAction, ClientHandshake, ClientPhase};
pub use infrastructure::network::{
    ClientConfig, ClientError, ClientSession, DEFAULT_HANDSHAKE_TIMEOUT,
};
