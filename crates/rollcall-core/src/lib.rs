//! # rollcall-core
//!
//! Shared library for Rollcall, a local classroom messaging protocol.  One
//! device hosts a session; the others join it, prove they are on the class
//! roster with a challenge–response handshake, and then exchange encrypted
//! messages with the host.
//!
//! This crate is used by both the host and the client.  It defines:
//!
//! - **`protocol`** – the [`Envelope`] wire unit and the newline-delimited
//!   JSON codec that frames it on a TCP stream.
//!
//! - **`crypto`** – the identity-bound AES-128-CBC binding.  Both sides derive
//!   the same key and IV from the participant identity alone.
//!
//! - **`domain`** – [`Identity`], the fixed [`AuthorizedSet`], and the
//!   [`SessionEvent`]s a session hands to the application.
//!
//! - **`transport`** – the [`Channel`]: one TCP stream, one envelope per
//!   line, a single-writer send path, and a close that unblocks pending I/O.
//!
//! ```text
//!  client                                   host
//!  ──────                                   ────
//!  {"message":"I am here","studentId":A} ──►
//!                                        ◄── {"message":"4821", ...}
//!  {"message":encrypt("4821",A)}         ──►  roster: A attends
//!  {"message":encrypt(chat,A)}          ◄──►  {"message":encrypt(reply,A)}
//! ```

pub mod crypto;
pub mod domain;
pub mod protocol;
pub mod transport;

pub use crypto::{DecryptionError, IdentityCipher};
pub use domain::{
    event_channel, AuthorizedSet, EventSink, EventStream, HandshakeFailure, Identity,
    SessionEvent,
};
pub use protocol::{decode_line, encode_line, Envelope, ProtocolError, HANDSHAKE_GREETING};
pub use transport::{Channel, ChannelError, ChannelHandle, ChannelReader};
