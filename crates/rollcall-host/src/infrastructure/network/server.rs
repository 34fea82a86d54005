//! TCP server session: accept loop and one worker task per connection.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting connections and spawning a worker for each one.
//! 3. Running the handshake state machine inside each worker and carrying out
//!    its actions against the shared [`Roster`].
//! 4. Sending host messages to a specific authenticated identity.
//! 5. Shutting everything down when [`ServerSession::close`] is called.
//!
//! # Task layout
//!
//! ```text
//!             ┌──────────────┐  spawn   ┌──────────────────────┐
//! listener ──►│   acceptor   │ ───────► │ worker (conn-1)      │──┐
//!             │ (one task)   │ ───────► │ worker (conn-2)      │──┤ SessionEvent
//!             └──────┬───────┘          └──────────────────────┘  ▼
//!                    │ shutdown watch            Roster ─────► EventSink
//! ```
//!
//! Workers live in a `JoinSet` owned by the acceptor.  A worker converts every
//! channel failure into a clean exit plus roster cleanup; a panicking worker
//! is logged by the acceptor and never takes the acceptor down with it.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use rollcall_core::{
    event_channel, AuthorizedSet, Channel, ChannelError, ChannelHandle, Envelope, EventSink,
    EventStream, HandshakeFailure, Identity, IdentityCipher, SessionEvent,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::handshake::{Action, ChallengeSource, ConnectionState, Phase};
use crate::application::roster::{ConnectionId, Roster};
use crate::infrastructure::network::challenge::RandomChallenges;

/// Well-known port the host listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Errors returned by [`ServerSession`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.  Fatal to session construction.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// No authenticated connection is bound to the identity.
    #[error("no authenticated connection for {0}")]
    RecipientNotFound(Identity),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The session has been closed.
    #[error("session is closed")]
    SessionClosed,
}

/// Listener settings for a [`ServerSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

/// State shared by the acceptor and every worker.
struct WorkerContext {
    roster: Roster,
    events: EventSink,
    challenges: Arc<dyn ChallengeSource>,
}

impl WorkerContext {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// A running host session.
///
/// Dropping the session signals shutdown; call [`close`](Self::close) to
/// also wait until every socket has been released.
pub struct ServerSession {
    roster: Roster,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

// ── Public API ────────────────────────────────────────────────────────────────

impl ServerSession {
    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the session and the stream of [`SessionEvent`]s it emits.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound
    /// (e.g. the port is already in use).
    pub async fn bind(
        config: ServerConfig,
        permitted: AuthorizedSet,
    ) -> Result<(Self, EventStream), ServerError> {
        let (events, stream) = event_channel();
        let session = Self::bind_with(config, permitted, events, Arc::new(RandomChallenges)).await?;
        Ok((session, stream))
    }

    /// Like [`bind`](Self::bind), but emits onto an existing sink and draws
    /// challenges from `challenges`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound.
    pub async fn bind_with(
        config: ServerConfig,
        permitted: AuthorizedSet,
        events: EventSink,
        challenges: Arc<dyn ChallengeSource>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        info!(
            "host session listening on {local_addr} ({} identities authorized)",
            permitted.len()
        );

        let roster = Roster::new(permitted, events.clone());
        let ctx = Arc::new(WorkerContext {
            roster: roster.clone(),
            events,
            challenges,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = tokio::spawn(run_acceptor(listener, ctx, shutdown_rx));

        Ok(Self {
            roster,
            local_addr,
            shutdown_tx,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session roster, for inspection.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Ordered list of identities that have authenticated and are attending.
    pub fn attendees(&self) -> Vec<Identity> {
        self.roster.snapshot_attendees()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Sends `envelope` to the connection bound to `identity`.
    ///
    /// The envelope is sent as given, except that its sender address is
    /// replaced with the host's address on that connection.
    ///
    /// # Errors
    ///
    /// - [`ServerError::RecipientNotFound`] if `identity` is not bound.
    /// - [`ServerError::Channel`] if the write fails.
    /// - [`ServerError::SessionClosed`] after [`close`](Self::close).
    pub async fn send_message_to_client(
        &self,
        identity: &Identity,
        envelope: Envelope,
    ) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::SessionClosed);
        }
        let Some(handle) = self.roster.sender_for(identity) else {
            warn!(%identity, "send failed: recipient not connected");
            return Err(ServerError::RecipientNotFound(identity.clone()));
        };
        let envelope = envelope.with_sender_address(handle.local_ip_string());
        handle.send(&envelope).await?;
        Ok(())
    }

    /// Encrypts `text` under `identity`'s key and sends it to that identity.
    ///
    /// # Errors
    ///
    /// Same as [`send_message_to_client`](Self::send_message_to_client).
    pub async fn send_text_to(&self, identity: &Identity, text: &str) -> Result<(), ServerError> {
        let ciphertext = IdentityCipher::for_identity(identity).encrypt(text);
        let envelope = Envelope::new(ciphertext, "", Some(identity.clone()));
        self.send_message_to_client(identity, envelope).await
    }

    /// Stops accepting, closes every channel, and waits for all workers to
    /// finish.  Idempotent.
    pub async fn close(&self) {
        let was_closed = self.shutdown_tx.send_replace(true);
        let acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(acceptor) = acceptor {
            if let Err(e) = acceptor.await {
                error!("acceptor task failed: {e}");
            }
        }
        if !was_closed {
            info!("host session on {} closed", self.local_addr);
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn run_acceptor(
    listener: TcpListener,
    ctx: Arc<WorkerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    let mut next_conn: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    next_conn += 1;
                    let conn = ConnectionId(next_conn);
                    info!(%conn, %peer_addr, "connection accepted");
                    workers.spawn(handle_connection(stream, conn, Arc::clone(&ctx)));
                }
                Err(e) => {
                    // Transient (e.g. too many open files); keep accepting.
                    error!("accept error: {e}");
                }
            },

            Some(finished) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("connection worker panicked: {e}");
                    }
                }
            }
        }
    }

    drop(listener);
    ctx.roster.close_all();
    workers.shutdown().await;
    debug!("acceptor stopped");
}

// ── Per-connection worker ─────────────────────────────────────────────────────

enum Flow {
    Continue,
    Stop,
}

/// Runs one connection from accept to close, then removes whatever roster
/// entries it still owns.
async fn handle_connection(stream: TcpStream, conn: ConnectionId, ctx: Arc<WorkerContext>) {
    let channel = match Channel::new(stream) {
        Ok(channel) => channel,
        Err(e) => {
            warn!(%conn, "could not set up channel: {e}");
            return;
        }
    };
    let (mut reader, handle) = channel.into_split();
    let mut state = ConnectionState::new();

    loop {
        let envelope = match reader.receive().await {
            Ok(envelope) => envelope,
            Err(e) if e.is_soft() => {
                warn!(%conn, "dropping record: {e}");
                continue;
            }
            Err(ChannelError::Closed) => {
                debug!(%conn, "channel closed");
                break;
            }
            Err(e) => {
                warn!(%conn, "channel failed: {e}");
                break;
            }
        };

        let action = state.on_envelope(envelope, ctx.roster.permitted(), ctx.challenges.as_ref());
        if let Flow::Stop = execute(action, conn, &handle, &ctx).await {
            break;
        }
    }

    if let Some(identity) = state.identity().cloned() {
        ctx.roster.evict(&identity, conn);
        if state.phase() == Phase::Challenged {
            ctx.emit(SessionEvent::HandshakeFailed {
                identity: Some(identity),
                reason: HandshakeFailure::ChannelClosed,
            });
        }
    }
    state.close();
    handle.close();
    debug!(%conn, "worker finished");
}

async fn execute(
    action: Action,
    conn: ConnectionId,
    handle: &ChannelHandle,
    ctx: &WorkerContext,
) -> Flow {
    match action {
        Action::SendChallenge {
            identity,
            challenge,
        } => {
            if ctx.roster.issue_challenge(&identity, conn, challenge).is_err() {
                return Flow::Stop;
            }
            let envelope = Envelope::new(
                challenge.to_string(),
                handle.local_ip_string(),
                Some(identity),
            );
            match handle.send(&envelope).await {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    warn!(%conn, "could not send challenge: {e}");
                    Flow::Stop
                }
            }
        }

        Action::Bind { identity } => {
            match ctx.roster.try_bind_identity(&identity, conn, handle.clone()) {
                Ok(outcome) => {
                    info!(
                        %identity,
                        %conn,
                        newly_attending = outcome.newly_attending,
                        "participant authenticated"
                    );
                    Flow::Continue
                }
                Err(e) => {
                    warn!(%identity, %conn, "could not bind: {e}");
                    Flow::Stop
                }
            }
        }

        Action::Deliver(envelope) => {
            ctx.emit(SessionEvent::Message(envelope));
            Flow::Continue
        }

        Action::Evict { identity, reason } => {
            warn!(%conn, identity = ?identity, %reason, "evicting connection");
            if let Some(identity) = &identity {
                ctx.roster.evict(identity, conn);
            }
            ctx.emit(SessionEvent::HandshakeFailed { identity, reason });
            handle.close();
            Flow::Stop
        }

        Action::Ignore { reason } => {
            debug!(%conn, reason, "envelope ignored");
            Flow::Continue
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
