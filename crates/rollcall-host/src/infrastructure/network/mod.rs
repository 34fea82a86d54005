//! Network infrastructure for the host.
//!
//! # Sub-modules
//!
//! - **`server`** – Binds the listener, runs the accept loop, and drives one
//!   worker task per connection through the handshake.
//!
//! - **`challenge`** – `ChallengeSource` implementations: a thread-RNG one for
//!   real sessions and a seeded one for reproducible runs.

pub mod challenge;
pub mod server;
