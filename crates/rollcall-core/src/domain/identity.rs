//! Participant identities and the pre-provisioned Authorized Set.
//!
//! An [`Identity`] is an opaque roster key, in practice a student id such as
//! `"816032311"`.  It is claimed by a participant in every envelope it sends
//! and is only trusted after the challenge–response handshake succeeds.
//!
//! The [`AuthorizedSet`] is fixed when a session is created and never mutated
//! afterwards, so it can be shared between connection workers behind an `Arc`
//! without any locking.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque participant identity (roster key).
///
/// Serialized transparently as a plain JSON string so that the wire format
/// stays `"studentId": "816032311"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an identity string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The fixed set of identities permitted to join a session.
///
/// Membership is the first gate of the handshake: a connection claiming an
/// identity outside this set is closed before any challenge is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedSet {
    members: HashSet<Identity>,
}

impl AuthorizedSet {
    /// Creates an empty set.  Nobody can authenticate against it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `identity` may progress past the handshake.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    /// Number of authorized identities.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if no identity is authorized.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates over the members in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }
}

impl<I> FromIterator<I> for AuthorizedSet
where
    I: Into<Identity>,
{
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
