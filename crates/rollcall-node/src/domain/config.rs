//! Node configuration schema.
//!
//! [`NodeConfig`] is what the `rollcall` binary reads from its TOML file.
//! Every field has a serde default, so an empty or missing file yields a
//! working classroom setup:
//!
//! ```toml
//! [node]
//! log_level = "info"
//!
//! [network]
//! port = 9999
//! host_address = "192.168.49.1"
//!
//! [roster]
//! authorized = ["816032311", "816117992"]
//!
//! [client]
//! student_id = "816032311"
//! handshake_timeout_secs = 10
//! ```
//!
//! [`LinkSettings`] is the validated, typed form the link controller works
//! with; [`NodeConfig::link_settings`] converts one into the other.

use std::net::IpAddr;
use std::time::Duration;

use rollcall_core::{AuthorizedSet, Identity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An address field is not a valid IP address.
    #[error("invalid {field}: '{value}' is not an IP address")]
    InvalidAddress { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the host listens and where participants connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// The host's address on the peer-to-peer group network.
    #[serde(default = "default_host_address")]
    pub host_address: String,
}

/// Identities permitted to join a hosted session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterConfig {
    #[serde(default = "default_authorized")]
    pub authorized: Vec<String>,
}

/// Participant settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Identity to join with.  Required for `join`, unused when hosting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    9999
}
fn default_host_address() -> String {
    "192.168.49.1".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    10
}

/// The class list a fresh install ships with.
const DEFAULT_CLASS: [&str; 30] = [
    "816032311", "816117992", "816001234", "816002345", "816003456", "816004567", "816005678",
    "816006789", "816007890", "816008901", "816009012", "816010123", "816011234", "816012345",
    "816013456", "816014567", "816015678", "816016789", "816017890", "816018901", "816019012",
    "816020123", "816021234", "816022345", "816023456", "816024567", "816025678", "816026789",
    "816027890", "816028901",
];

fn default_authorized() -> Vec<String> {
    DEFAULT_CLASS.iter().map(|s| s.to_string()).collect()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host_address: default_host_address(),
        }
    }
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            authorized: default_authorized(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            student_id: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

// ── Validated settings ────────────────────────────────────────────────────────

/// Typed settings consumed by the link controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub port: u16,
    pub host_address: IpAddr,
    pub authorized: AuthorizedSet,
    pub identity: Option<Identity>,
    pub handshake_timeout: Duration,
}

impl NodeConfig {
    /// Validates the file contents into [`LinkSettings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `network.host_address` is
    /// not an IP address.
    pub fn link_settings(&self) -> Result<LinkSettings, ConfigError> {
        let host_address = self
            .network
            .host_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                field: "network.host_address",
                value: self.network.host_address.clone(),
            })?;

        Ok(LinkSettings {
            port: self.network.port,
            host_address,
            authorized: self.roster.authorized.iter().map(String::as_str).collect(),
            identity: self.client.student_id.as_deref().map(Identity::from),
            handshake_timeout: Duration::from_secs(self.client.handshake_timeout_secs),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
