//! Domain types shared by the host and the client.
//!
//! Nothing in here performs I/O.  [`identity`] holds the roster key type and
//! the fixed Authorized Set; [`events`] defines the notifications a session
//! hands to the application.

pub mod events;
pub mod identity;

pub use events::{event_channel, EventSink, EventStream, HandshakeFailure, SessionEvent};
pub use identity::{AuthorizedSet, Identity};
