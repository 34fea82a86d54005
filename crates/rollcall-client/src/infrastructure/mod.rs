//! Infrastructure layer for the participant.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rollcall_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`network`** – Connects to the host, drives the handshake under a
//!   deadline, and runs the reader task that emits session events.

pub mod network;
