//! rollcall-node library crate.
//!
//! Wires the host and participant sessions to the outside world: a TOML
//! configuration file, a link-layer controller, and the `rollcall` binary.
//!
//! # Architecture
//!
//! ```text
//! link layer (Wi-Fi Direct group, or `rollcall host` / `rollcall join`)
//!         ↓ LinkEvent
//! [rollcall-node]
//!   ├── domain/           NodeConfig schema, LinkSettings
//!   ├── application/      LinkController: one active session at a time
//!   └── infrastructure/   Config file load/save
//!         ↓
//! rollcall-host::ServerSession  or  rollcall-client::ClientSession
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O.
//! - `application` depends on `domain` and the session crates.
//! - `infrastructure` touches the file system only.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: link-driven session lifecycle.
pub mod application;

/// Infrastructure layer: config persistence.
pub mod infrastructure;
