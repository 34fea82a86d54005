//! Network infrastructure for the participant.
//!
//! Opens the single TCP connection to the host, completes the handshake
//! under a deadline, and then hands decrypted messages to the application.
//!
//! Architecture:
//! - [`ClientSession::connect`] returns only once the challenge has been
//!   answered, so a session value is always past the handshake.
//! - A reader task owns the receiving half and pushes
//!   [`SessionEvent`]s onto the event sink until the channel closes.
//! - Outbound messages go through a cloned [`ChannelHandle`], so sends never
//!   wait on the reader.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use rollcall_core::{
    event_channel, Channel, ChannelError, ChannelHandle, ChannelReader, EventSink, EventStream,
    HandshakeFailure, Identity, SessionEvent,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::application::handshake::{ClientAction, ClientHandshake};

/// How long to wait for the host's challenge after connecting.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the host failed.
    #[error("failed to connect to host at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: ChannelError,
    },

    /// The host did not issue a challenge before the deadline.
    #[error("host did not issue a challenge within {0:?}")]
    HandshakeTimeout(Duration),

    /// The channel closed, either before authentication completed or
    /// before a send.
    #[error("connection to host closed")]
    ChannelClosed,

    #[error("connection I/O error: {0}")]
    Channel(#[source] ChannelError),
}

impl From<ChannelError> for ClientError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Closed => Self::ChannelClosed,
            other => Self::Channel(other),
        }
    }
}

impl ClientError {
    /// The handshake failure this error represents, for event reporting.
    pub fn handshake_failure(&self) -> HandshakeFailure {
        match self {
            Self::ConnectFailed { .. } => HandshakeFailure::ConnectFailed,
            Self::HandshakeTimeout(_) => HandshakeFailure::Timeout,
            Self::ChannelClosed | Self::Channel(_) => HandshakeFailure::ChannelClosed,
        }
    }
}

/// Configuration for the participant's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Address of the host's listening port.
    pub host_addr: SocketAddr,
    /// Identity to claim and authenticate as.
    pub identity: Identity,
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host_addr: SocketAddr, identity: Identity) -> Self {
        Self {
            host_addr,
            identity,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// An authenticated connection to the host.
pub struct ClientSession {
    handshake: ClientHandshake,
    handle: ChannelHandle,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

// ── Public API ────────────────────────────────────────────────────────────────

impl ClientSession {
    /// Connects to the host and completes the handshake.
    ///
    /// Returns the session and the stream of [`SessionEvent`]s it emits.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectFailed`] if the host is unreachable.
    /// - [`ClientError::HandshakeTimeout`] if the connect or the challenge
    ///   does not finish within `handshake_timeout`.
    /// - [`ClientError::ChannelClosed`] if the host closes the connection
    ///   first (e.g. the identity is not on the roster).
    pub async fn connect(config: ClientConfig) -> Result<(Self, EventStream), ClientError> {
        let (events, stream) = event_channel();
        let session = Self::connect_with_sink(config, events).await?;
        Ok((session, stream))
    }

    /// Like [`connect`](Self::connect), but emits onto an existing sink.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with_sink(
        config: ClientConfig,
        events: EventSink,
    ) -> Result<Self, ClientError> {
        let addr = config.host_addr;
        let channel = match time::timeout(config.handshake_timeout, Channel::connect(addr)).await {
            Ok(result) => result.map_err(|source| ClientError::ConnectFailed { addr, source })?,
            Err(_) => {
                warn!(host = %addr, "connect did not finish within {:?}", config.handshake_timeout);
                return Err(ClientError::HandshakeTimeout(config.handshake_timeout));
            }
        };
        let (mut reader, handle) = channel.into_split();
        let local_ip = handle.local_ip_string();
        let mut handshake = ClientHandshake::new(config.identity.clone());

        info!(identity = %config.identity, host = %addr, "connected; greeting host");

        let outcome = time::timeout(
            config.handshake_timeout,
            complete_handshake(&mut reader, &handle, &mut handshake, &local_ip),
        )
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(identity = %config.identity, "handshake failed: {e}");
                handle.close();
                return Err(e);
            }
            Err(_) => {
                warn!(identity = %config.identity, "no challenge within {:?}", config.handshake_timeout);
                handle.close();
                return Err(ClientError::HandshakeTimeout(config.handshake_timeout));
            }
        }

        info!(identity = %config.identity, "challenge answered; session open");
        let reader_task = tokio::spawn(run_reader(
            reader,
            handle.clone(),
            handshake.clone(),
            local_ip,
            events,
        ));

        Ok(Self {
            handshake,
            handle,
            reader_task: Mutex::new(Some(reader_task)),
        })
    }

    pub fn identity(&self) -> &Identity {
        self.handshake.identity()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn host_addr(&self) -> SocketAddr {
        self.handle.peer_addr()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Encrypts `text` under this participant's key and sends it.
    ///
    /// # Errors
    ///
    /// [`ClientError::ChannelClosed`] once the connection is gone, or
    /// [`ClientError::Channel`] if the write fails.
    pub async fn send_text(&self, text: &str) -> Result<(), ClientError> {
        let envelope = self.handshake.seal(text, self.handle.local_ip_string());
        self.handle.send(&envelope).await?;
        Ok(())
    }

    /// Sends `text` from a detached task; a failure is logged, not returned.
    pub fn post_text(&self, text: impl Into<String>) {
        let envelope = self
            .handshake
            .seal(&text.into(), self.handle.local_ip_string());
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.send(&envelope).await {
                warn!("message not sent: {e}");
            }
        });
    }

    /// Closes the connection and waits for the reader task to finish.
    /// Idempotent.
    pub async fn close(&self) {
        self.handle.close();
        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("reader task failed: {e}");
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("identity", self.identity())
            .field("host", &self.host_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Handshake and reader ──────────────────────────────────────────────────────

async fn complete_handshake(
    reader: &mut ChannelReader,
    handle: &ChannelHandle,
    handshake: &mut ClientHandshake,
    local_ip: &str,
) -> Result<(), ClientError> {
    handle.send(&handshake.greeting(local_ip)).await?;

    loop {
        let envelope = match reader.receive().await {
            Ok(envelope) => envelope,
            Err(e) if e.is_soft() => {
                warn!("dropping record while awaiting challenge: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match handshake.on_envelope(envelope, local_ip) {
            ClientAction::Respond(echo) => {
                handle.send(&echo).await?;
                return Ok(());
            }
            ClientAction::Ignore(reason) => debug!(reason, "ignored while awaiting challenge"),
            ClientAction::Deliver(_) => return Ok(()),
        }
    }
}

async fn run_reader(
    mut reader: ChannelReader,
    handle: ChannelHandle,
    mut handshake: ClientHandshake,
    local_ip: String,
    events: EventSink,
) {
    loop {
        match reader.receive().await {
            Ok(envelope) => match handshake.on_envelope(envelope, &local_ip) {
                ClientAction::Deliver(message) => {
                    if events.send(SessionEvent::Message(message)).is_err() {
                        debug!("event receiver dropped");
                    }
                }
                ClientAction::Ignore(reason) => debug!(reason, "envelope ignored"),
                ClientAction::Respond(_) => {}
            },
            Err(e) if e.is_soft() => warn!("dropping record: {e}"),
            Err(ChannelError::Closed) => break,
            Err(e) => {
                warn!("channel failed: {e}");
                break;
            }
        }
    }

    handle.close();
    info!(identity = %handshake.identity(), "disconnected from host");
    if events.send(SessionEvent::Disconnected).is_err() {
        debug!("event receiver dropped");
    }
}
