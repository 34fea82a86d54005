//! LinkController: turns link-layer events into session lifecycles.
//!
//! The discovery layer (Wi-Fi Direct group formation on phones, a CLI
//! subcommand here) reports two things: a link came up, with this
//! node either hosting or joining, and the link went away.  The controller
//! owns at most one session at a time:
//!
//! ```text
//! link_established(host=true,  addr) ──► ServerSession bound to addr:port
//! link_established(host=false, addr) ──► ClientSession connected to addr:port
//! link_lost()                        ──► close the active session (if any)
//! ```
//!
//! All sessions emit onto the controller's single event sink, so the
//! application drains one stream no matter how many times the link flaps.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rollcall_client::{ClientConfig, ClientError, ClientSession};
use rollcall_core::{event_channel, EventSink, EventStream, SessionEvent};
use rollcall_host::{RandomChallenges, ServerConfig, ServerError, ServerSession};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::config::LinkSettings;

/// Errors raised while starting a session for a new link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid host address '{0}'")]
    InvalidAddress(String),

    /// Joining requires a participant identity.
    #[error("no student id configured; set client.student_id or pass --student-id")]
    MissingIdentity,

    #[error("could not start host session: {0}")]
    Host(#[from] ServerError),

    #[error("could not join host: {0}")]
    Client(#[from] ClientError),
}

/// A link-layer notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Established { is_host: bool, host_address: String },
    Lost,
}

/// The session currently running on this node.
#[derive(Debug)]
pub enum ActiveSession {
    Host(ServerSession),
    Client(ClientSession),
}

impl ActiveSession {
    async fn close(&self) {
        match self {
            Self::Host(session) => session.close().await,
            Self::Client(session) => session.close().await,
        }
    }
}

/// Owns the node's active session and reacts to link changes.
pub struct LinkController {
    settings: LinkSettings,
    events: EventSink,
    active: Option<ActiveSession>,
}

impl LinkController {
    /// Creates a controller and the event stream all its sessions feed.
    pub fn new(settings: LinkSettings) -> (Self, EventStream) {
        let (events, stream) = event_channel();
        (Self::with_sink(settings, events), stream)
    }

    pub fn with_sink(settings: LinkSettings, events: EventSink) -> Self {
        Self {
            settings,
            events,
            active: None,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn host_session(&self) -> Option<&ServerSession> {
        match &self.active {
            Some(ActiveSession::Host(session)) => Some(session),
            _ => None,
        }
    }

    pub fn client_session(&self) -> Option<&ClientSession> {
        match &self.active {
            Some(ActiveSession::Client(session)) => Some(session),
            _ => None,
        }
    }

    /// Starts the session for a newly established link, closing any session
    /// left over from a previous link first.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidAddress`] if `host_address` is not an IP.
    /// - [`LinkError::Host`] if the listener cannot be bound.
    /// - [`LinkError::MissingIdentity`] when joining without an identity.
    /// - [`LinkError::Client`] if joining fails; a `HandshakeFailed` event
    ///   is emitted as well.
    pub async fn link_established(
        &mut self,
        is_host: bool,
        host_address: &str,
    ) -> Result<(), LinkError> {
        let ip: IpAddr = host_address
            .trim()
            .parse()
            .map_err(|_| LinkError::InvalidAddress(host_address.to_string()))?;
        let addr = SocketAddr::new(ip, self.settings.port);

        self.link_lost().await;

        if is_host {
            info!("link established as host; listening on {addr}");
            let session = ServerSession::bind_with(
                ServerConfig::new(addr),
                self.settings.authorized.clone(),
                self.events.clone(),
                Arc::new(RandomChallenges),
            )
            .await?;
            self.active = Some(ActiveSession::Host(session));
            return Ok(());
        }

        let identity = self
            .settings
            .identity
            .clone()
            .ok_or(LinkError::MissingIdentity)?;
        info!(%identity, "link established as participant; joining {addr}");

        let mut config = ClientConfig::new(addr, identity.clone());
        config.handshake_timeout = self.settings.handshake_timeout;
        match ClientSession::connect_with_sink(config, self.events.clone()).await {
            Ok(session) => {
                self.active = Some(ActiveSession::Client(session));
                Ok(())
            }
            Err(e) => {
                let event = SessionEvent::HandshakeFailed {
                    identity: Some(identity),
                    reason: e.handshake_failure(),
                };
                if self.events.send(event).is_err() {
                    debug!("event receiver dropped");
                }
                Err(e.into())
            }
        }
    }

    /// Closes the active session and releases its sockets.  A no-op when
    /// nothing is running.
    pub async fn link_lost(&mut self) {
        if let Some(session) = self.active.take() {
            info!("link lost; closing active session");
            session.close().await;
        }
    }

    /// Dispatches a [`LinkEvent`].
    ///
    /// # Errors
    ///
    /// See [`link_established`](Self::link_established).
    pub async fn handle(&mut self, event: LinkEvent) -> Result<(), LinkError> {
        match event {
            LinkEvent::Established {
                is_host,
                host_address,
            } => {
                let result = self.link_established(is_host, &host_address).await;
                if let Err(e) = &result {
                    warn!("could not start session: {e}");
                }
                result
            }
            LinkEvent::Lost => {
                self.link_lost().await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LinkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkController")
            .field("port", &self.settings.port)
            .field("active", &self.active)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
