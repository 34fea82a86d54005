//! Rollcall node: entry point.
//!
//! Runs one classroom session from the terminal, either as the host that
//! takes attendance or as a participant joining it.  Lines typed on stdin
//! become messages; session events are printed as they arrive.
//!
//! # Usage
//!
//! ```text
//! rollcall [--config <PATH>] host [--address <IP>] [--port <PORT>]
//! rollcall [--config <PATH>] join [--address <IP>] [--port <PORT>] [--student-id <ID>]
//! ```
//!
//! As host, type `<student-id> <message>` to message one participant.  As a
//! participant, every line is sent to the host.
//!
//! # Environment variable overrides
//!
//! | Variable              | Description                          |
//! |-----------------------|--------------------------------------|
//! | `ROLLCALL_CONFIG`     | Config file path                     |
//! | `ROLLCALL_STUDENT_ID` | Identity used by `join`              |
//! | `RUST_LOG`            | Log filter; overrides `node.log_level` |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rollcall_core::{Envelope, Identity, IdentityCipher, SessionEvent};
use rollcall_node::application::{ActiveSession, LinkController};
use rollcall_node::domain::{LinkSettings, NodeConfig};
use rollcall_node::infrastructure::{default_config_path, load_config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Local classroom messaging with challenge–response attendance.
#[derive(Debug, Parser)]
#[command(name = "rollcall", version)]
struct Cli {
    /// Config file to load instead of the platform default.
    #[arg(long, env = "ROLLCALL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Host a session and take attendance.
    Host {
        /// Address to listen on; defaults to `network.host_address`.
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Join a hosted session.
    Join {
        /// Host address; defaults to `network.host_address`.
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, env = "ROLLCALL_STUDENT_ID")]
        student_id: Option<String>,
    },
}

impl Command {
    fn is_host(&self) -> bool {
        matches!(self, Self::Host { .. })
    }
}

impl Cli {
    /// Applies command-line overrides on top of the loaded config and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting host address is not an IP.
    fn into_settings(self, mut config: NodeConfig) -> anyhow::Result<LinkSettings> {
        let (address, port) = match self.command {
            Command::Host { address, port } => (address, port),
            Command::Join {
                address,
                port,
                student_id,
            } => {
                if student_id.is_some() {
                    config.client.student_id = student_id;
                }
                (address, port)
            }
        };
        if let Some(address) = address {
            config.network.host_address = address;
        }
        if let Some(port) = port {
            config.network.port = port;
        }

        config.link_settings().context("invalid settings")
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_config(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    let is_host = cli.command.is_host();
    let settings = cli.into_settings(config)?;
    let host_address = settings.host_address.to_string();
    let port = settings.port;

    let (mut controller, mut events) = LinkController::new(settings);
    controller
        .link_established(is_host, &host_address)
        .await
        .with_context(|| format!("could not start session on {host_address}:{port}"))?;

    if let Some(host) = controller.host_session() {
        info!("hosting on {}; type '<student-id> <message>'", host.local_addr());
    } else {
        info!("joined; type a message and press Enter");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => dispatch_line(&controller, &line).await,
                Ok(None) => {
                    info!("stdin closed; still listening until Ctrl+C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected) => {
                    println!("* disconnected from host");
                    break;
                }
                Some(event) => report(&event, is_host),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("failed to listen for Ctrl+C: {e}");
                }
                info!("received Ctrl+C; shutting down");
                break;
            }
        }
    }

    controller.link_lost().await;
    info!("rollcall stopped");
    Ok(())
}

// ── Line and event handling ───────────────────────────────────────────────────

async fn dispatch_line(controller: &LinkController, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match controller.active() {
        Some(ActiveSession::Host(host)) => {
            let Some((recipient, text)) = parse_directed(line) else {
                warn!("expected '<student-id> <message>'");
                return;
            };
            if let Err(e) = host.send_text_to(&Identity::from(recipient), text).await {
                warn!("message to {recipient} not sent: {e}");
            }
        }
        Some(ActiveSession::Client(client)) => {
            if let Err(e) = client.send_text(line).await {
                warn!("message not sent: {e}");
            }
        }
        None => warn!("no active session"),
    }
}

/// Splits `"<id> <text>"` into its recipient and message.
fn parse_directed(line: &str) -> Option<(&str, &str)> {
    let (recipient, text) = line.trim().split_once(char::is_whitespace)?;
    let text = text.trim();
    (!text.is_empty()).then_some((recipient, text))
}

fn report(event: &SessionEvent, is_host: bool) {
    match event {
        SessionEvent::Message(envelope) => println!("{}", render_message(envelope, is_host)),
        SessionEvent::AttendanceChanged(attendees) => {
            let names: Vec<&str> = attendees.iter().map(Identity::as_str).collect();
            println!("* attendance ({}): {}", names.len(), names.join(", "));
        }
        SessionEvent::HandshakeFailed { identity, reason } => match identity {
            Some(identity) => println!("* {identity} failed to authenticate: {reason}"),
            None => println!("* a connection failed to authenticate: {reason}"),
        },
        SessionEvent::Disconnected => println!("* disconnected"),
    }
}

/// Formats a received message for the terminal.
///
/// The host receives payloads still `sealed` under the sender's key; the
/// participant session has already opened them.
fn render_message(envelope: &Envelope, sealed: bool) -> String {
    match envelope.participant_id() {
        Some(sender) if sealed => {
            match IdentityCipher::for_identity(sender).decrypt(envelope.payload()) {
                Ok(text) => format!("[{sender}] {text}"),
                Err(e) => format!("[{sender}] <unreadable: {e}>"),
            }
        }
        _ => format!("[{}] {}", envelope.sender_address(), envelope.payload()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
