//! Roster: the host's single record of who is connected, challenged,
//! authorized, and attending.
//!
//! Every piece of shared mutable state the host keeps lives here, behind one
//! `std::sync::Mutex`.  Connection workers never touch the maps directly;
//! they call the atomic operations below, each of which takes the lock once,
//! applies a whole transition, and emits any resulting attendance event while
//! still holding it so that notifications leave in mutation order.
//!
//! # Ownership (for beginners)
//!
//! Each entry remembers which connection created it (a [`ConnectionId`]).
//! When a connection goes away it can only remove entries it owns.  This
//! matters under last-authenticated-wins:
//!
//! ```text
//! conn 1 authenticates as A   connections[A] = conn 1
//! conn 2 authenticates as A   connections[A] = conn 2, conn 1 is closed
//! conn 1 worker cleans up     evict(A, conn 1) → nothing owned, no-op
//! ```
//!
//! Without the ownership check the stale worker's cleanup would tear down
//! the binding that replaced it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rollcall_core::{AuthorizedSet, ChannelHandle, EventSink, Identity, SessionEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Per-session connection number assigned by the acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Error returned by roster mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    /// The roster was closed by [`Roster::close_all`]; no new bindings.
    #[error("session is closed")]
    SessionClosed,
}

/// Result of a successful [`Roster::try_bind_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// `true` if the identity was appended to the attendee list.
    pub newly_attending: bool,
    /// The connection whose binding was displaced, if any.
    pub displaced: Option<ConnectionId>,
}

/// Point-in-time copy of every roster set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub connections: HashMap<Identity, ConnectionId>,
    pub challenges: HashMap<Identity, u32>,
    pub authorized: HashSet<Identity>,
    pub attendees: Vec<Identity>,
}

impl RosterSnapshot {
    /// `true` if `identity` appears in none of the four sets.
    pub fn excludes(&self, identity: &Identity) -> bool {
        !self.connections.contains_key(identity)
            && !self.challenges.contains_key(identity)
            && !self.authorized.contains(identity)
            && !self.attendees.contains(identity)
    }
}

#[derive(Debug)]
struct Binding {
    conn: ConnectionId,
    handle: ChannelHandle,
}

#[derive(Debug, Clone, Copy)]
struct PendingChallenge {
    conn: ConnectionId,
    value: u32,
}

#[derive(Debug, Default)]
struct RosterState {
    connections: HashMap<Identity, Binding>,
    challenges: HashMap<Identity, PendingChallenge>,
    authorized: HashSet<Identity>,
    attendees: Vec<Identity>,
    closed: bool,
}

/// Shared host roster.  Cheap to clone: all clones see the same state.
#[derive(Clone)]
pub struct Roster {
    permitted: Arc<AuthorizedSet>,
    state: Arc<Mutex<RosterState>>,
    events: EventSink,
}

impl Roster {
    /// Creates an empty roster over a fixed authorized set.
    pub fn new(permitted: AuthorizedSet, events: EventSink) -> Self {
        Self {
            permitted: Arc::new(permitted),
            state: Arc::new(Mutex::new(RosterState::default())),
            events,
        }
    }

    /// The read-only authorized set.
    pub fn permitted(&self) -> &AuthorizedSet {
        &self.permitted
    }

    /// `true` if `identity` may join this session at all.
    pub fn is_permitted(&self, identity: &Identity) -> bool {
        self.permitted.contains(identity)
    }

    /// Records `value` as the pending challenge for `identity`, issued on
    /// `conn`.  Replaces any earlier challenge.
    pub fn issue_challenge(
        &self,
        identity: &Identity,
        conn: ConnectionId,
        value: u32,
    ) -> Result<(), RosterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RosterError::SessionClosed);
        }
        state
            .challenges
            .insert(identity.clone(), PendingChallenge { conn, value });
        debug!(%identity, %conn, "challenge recorded");
        Ok(())
    }

    /// Binds `identity` to the channel of `conn` after a verified response.
    ///
    /// Clears the pending challenge, marks the identity authorized, and
    /// appends it to the attendees once.  If another connection already held
    /// the binding, that connection's channel is closed (last-authenticated
    /// wins).
    ///
    /// # Errors
    ///
    /// Returns [`RosterError::SessionClosed`] after [`close_all`](Self::close_all).
    pub fn try_bind_identity(
        &self,
        identity: &Identity,
        conn: ConnectionId,
        handle: ChannelHandle,
    ) -> Result<BindOutcome, RosterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RosterError::SessionClosed);
        }

        state.challenges.remove(identity);
        state.authorized.insert(identity.clone());

        let previous = state
            .connections
            .insert(identity.clone(), Binding { conn, handle });
        let displaced = match previous {
            Some(old) if old.conn != conn => {
                info!(%identity, stale = %old.conn, current = %conn, "identity re-authenticated; closing stale channel");
                old.handle.close();
                Some(old.conn)
            }
            _ => None,
        };

        let newly_attending = !state.attendees.contains(identity);
        if newly_attending {
            state.attendees.push(identity.clone());
            self.emit_attendance(&state);
        }

        Ok(BindOutcome {
            newly_attending,
            displaced,
        })
    }

    /// Removes every entry for `identity` that `conn` owns.
    ///
    /// Entries owned by another connection are left alone.  Returns `true`
    /// if anything was removed.
    pub fn evict(&self, identity: &Identity, conn: ConnectionId) -> bool {
        let mut state = self.lock();

        let had_challenge = matches!(state.challenges.get(identity), Some(c) if c.conn == conn);
        if had_challenge {
            state.challenges.remove(identity);
        }

        let owns_binding = matches!(state.connections.get(identity), Some(b) if b.conn == conn);
        if !owns_binding {
            return had_challenge;
        }

        if let Some(binding) = state.connections.remove(identity) {
            binding.handle.close();
        }
        state.authorized.remove(identity);
        let before = state.attendees.len();
        state.attendees.retain(|a| a != identity);
        if state.attendees.len() != before {
            self.emit_attendance(&state);
        }
        debug!(%identity, %conn, "roster entries evicted");
        true
    }

    /// Channel currently bound to `identity`, if any.
    pub fn sender_for(&self, identity: &Identity) -> Option<ChannelHandle> {
        self.lock()
            .connections
            .get(identity)
            .map(|b| b.handle.clone())
    }

    /// Ordered copy of the attendee list.
    pub fn snapshot_attendees(&self) -> Vec<Identity> {
        self.lock().attendees.clone()
    }

    /// Copy of all four roster sets.
    pub fn snapshot(&self) -> RosterSnapshot {
        let state = self.lock();
        RosterSnapshot {
            connections: state
                .connections
                .iter()
                .map(|(id, b)| (id.clone(), b.conn))
                .collect(),
            challenges: state
                .challenges
                .iter()
                .map(|(id, c)| (id.clone(), c.value))
                .collect(),
            authorized: state.authorized.clone(),
            attendees: state.attendees.clone(),
        }
    }

    /// Closes every bound channel, clears all state, and refuses further
    /// bindings.  Idempotent.
    pub fn close_all(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for binding in state.connections.values() {
            binding.handle.close();
        }
        let had_attendees = !state.attendees.is_empty();
        state.connections.clear();
        state.challenges.clear();
        state.authorized.clear();
        state.attendees.clear();
        if had_attendees {
            self.emit_attendance(&state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RosterState> {
        // Poisoning is ignored; no transition leaves the maps half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_attendance(&self, state: &RosterState) {
        if self
            .events
            .send(SessionEvent::AttendanceChanged(state.attendees.clone()))
            .is_err()
        {
            warn!("event receiver dropped; attendance change not delivered");
        }
    }
}

impl fmt::Debug for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Roster")
            .field("permitted", &self.permitted.len())
            .field("attendees", &self.snapshot_attendees())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
