//! Application layer for the host.
//!
//! # What lives here? (for beginners)
//!
//! Pure session logic with no sockets and no tasks:
//!
//! - **`handshake`** – The per-connection state machine.  Given one received
//!   envelope it decides what should happen next (issue a challenge, bind,
//!   deliver, evict) and returns that as an `Action` value.
//!
//! - **`roster`** – The one shared, mutex-guarded record of connections,
//!   pending challenges, authorized identities, and attendees.  Every
//!   mutation is a single atomic operation.
//!
//! The infrastructure layer wires these to real TCP connections.

pub mod handshake;
pub mod roster;
