//! Domain layer for the rollcall node.
//!
//! Pure configuration types: the on-disk [`NodeConfig`] schema and the
//! validated [`LinkSettings`] derived from it.  No I/O happens here.

pub mod config;

pub use config::{ConfigError, LinkSettings, NodeConfig};
