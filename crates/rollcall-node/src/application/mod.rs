//! Application layer for the rollcall node.
//!
//! Reacts to link-layer changes by starting and stopping host or
//! participant sessions.

pub mod link;

pub use link::{ActiveSession, LinkController, LinkError, LinkEvent};
