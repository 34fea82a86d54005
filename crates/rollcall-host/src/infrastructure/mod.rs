//! Infrastructure layer for the host.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rollcall_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
