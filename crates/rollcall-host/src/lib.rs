//! rollcall-host library entry point.
//!
//! The host side of a classroom session: it owns the roster, runs the
//! challenge–response handshake for every connecting participant, and relays
//! authenticated messages to the application.
//!
//! ```rust,no_run
//! use rollcall_core::AuthorizedSet;
//! use rollcall_host::{ServerConfig, ServerSession};
//!
//! # async fn demo() -> Result<(), rollcall_host::ServerError> {
//! let class: AuthorizedSet = ["816032311", "816117992"].into_iter().collect();
//! let (session, mut events) = ServerSession::bind(ServerConfig::default(), class).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod infrastructure;

pub use application::handshake::{Action, ChallengeSource, ConnectionState, Phase};
pub use application::roster::{BindOutcome, ConnectionId, Roster, RosterError, RosterSnapshot};
pub use infrastructure::network::challenge::{RandomChallenges, SeededChallenges};
pub use infrastructure::network::server::{ServerConfig, ServerError, ServerSession, DEFAULT_PORT};
