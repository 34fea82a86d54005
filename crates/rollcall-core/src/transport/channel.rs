//! Connection channel: one TCP stream carrying newline-terminated envelopes.
//!
//! # Halves
//!
//! A [`Channel`] is split into two owners:
//!
//! - [`ChannelReader`] – owned exclusively by the worker that drives the
//!   connection.  `receive()` yields one [`Envelope`] per record.
//! - [`ChannelHandle`] – cheap to clone.  Anything that needs to *send* to
//!   the peer or *close* the connection (the roster, the application) holds
//!   one of these.
//!
//! # Single-writer discipline
//!
//! The write half sits behind a `tokio::sync::Mutex`, so concurrent
//! `send()` calls queue up and each record is written with one `write_all`.
//! Records from two senders never interleave on the wire.
//!
//! # Closing
//!
//! `close()` is synchronous and idempotent.  It flips a `watch` flag that
//! every pending `receive()` and `send()` is also selecting on, so blocked
//! I/O returns [`ChannelError::Closed`] promptly instead of waiting for the
//! peer.  The write half is dropped (sending FIN) as soon as no send holds
//! it; the read half is released when the owning worker drops its reader.
//! Dropping every handle also counts as closing: the reader stops.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::protocol::codec::{decode_line, encode_line, ProtocolError};
use crate::protocol::envelope::Envelope;

/// Errors surfaced by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was closed locally or the peer hung up.
    #[error("channel closed")]
    Closed,

    /// One record could not be decoded.  The channel itself is still usable.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    /// The underlying socket failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// `true` for errors that only affect a single record.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

struct Shared {
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed_tx: watch::Sender<bool>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

/// Sending/closing side of a channel.  Clones refer to the same connection.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

/// Receiving side of a channel.
pub struct ChannelReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
    closed_rx: watch::Receiver<bool>,
    peer_addr: SocketAddr,
}

/// A full channel: reader plus handle.
pub struct Channel {
    reader: ChannelReader,
    handle: ChannelHandle,
}

impl Channel {
    /// Wraps an already-connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the socket addresses cannot be read,
    /// which only happens when the stream is already dead.
    pub fn new(stream: TcpStream) -> Result<Self, ChannelError> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = ChannelHandle {
            shared: Arc::new(Shared {
                writer: Mutex::new(Some(write_half)),
                closed_tx,
                peer_addr,
                local_addr,
            }),
        };
        let reader = ChannelReader {
            lines: BufReader::new(read_half).lines(),
            closed_rx,
            peer_addr,
        };
        Ok(Self { reader, handle })
    }

    /// Opens a TCP connection to `addr` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the connection cannot be established.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        self.handle.send(envelope).await
    }

    pub async fn receive(&mut self) -> Result<Envelope, ChannelError> {
        self.reader.receive().await
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Returns a new handle to this channel.
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Separates the reader from the handle so they can live in different tasks.
    pub fn into_split(self) -> (ChannelReader, ChannelHandle) {
        (self.reader, self.handle)
    }
}

impl ChannelHandle {
    /// Serializes `envelope` and writes it as one record.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] if the channel is (or becomes) closed.
    /// - [`ChannelError::Io`] if the write fails; the channel is closed.
    /// - [`ChannelError::Malformed`] if the envelope cannot be encoded.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        let line = encode_line(envelope)?;
        let mut closed_rx = self.shared.closed_tx.subscribe();
        if *closed_rx.borrow() {
            return Err(ChannelError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.shared.writer.lock() => guard,
            _ = closed_rx.wait_for(|closed| *closed) => return Err(ChannelError::Closed),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(ChannelError::Closed);
        };

        let result = tokio::select! {
            written = writer.write_all(line.as_bytes()) => written.map_err(ChannelError::from),
            _ = closed_rx.wait_for(|closed| *closed) => Err(ChannelError::Closed),
        };

        if result.is_err() || *closed_rx.borrow() {
            guard.take();
            drop(guard);
            self.close();
        }
        result
    }

    /// Closes the channel.  Safe to call any number of times from any task.
    pub fn close(&self) {
        let was_closed = self.shared.closed_tx.send_replace(true);
        if !was_closed {
            debug!(peer = %self.shared.peer_addr, "channel closed");
        }
        if let Ok(mut guard) = self.shared.writer.try_lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Local IP as text, the value stamped into `senderIp`.
    pub fn local_ip_string(&self) -> String {
        self.shared.local_addr.ip().to_string()
    }

    /// `true` if both handles refer to the same connection.
    pub fn same_channel(&self, other: &ChannelHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("peer_addr", &self.shared.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChannelReader {
    /// Waits for the next record.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] on local close or peer EOF.
    /// - [`ChannelError::Malformed`] for one undecodable record; call again
    ///   to read the next one.
    /// - [`ChannelError::Io`] if the socket fails.
    pub async fn receive(&mut self) -> Result<Envelope, ChannelError> {
        if *self.closed_rx.borrow() {
            return Err(ChannelError::Closed);
        }

        let next = tokio::select! {
            biased;
            _ = self.closed_rx.wait_for(|closed| *closed) => return Err(ChannelError::Closed),
            next = self.lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => Ok(decode_line(&line)?),
            Ok(None) => Err(ChannelError::Closed),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(ChannelError::Malformed(
                ProtocolError::MalformedEnvelope("record is not valid UTF-8".to_string()),
            )),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use crate::domain::identity::Identity;

    /// Returns (client channel, raw server-side stream).
    async fn connected_pair() -> (Channel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(Channel::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn channel_pair() -> (Channel, Channel) {
        let (client, server) = connected_pair().await;
        (client, Channel::new(server).unwrap())
    }

    #[tokio::test]
    async fn test_send_then_receive_preserves_envelope() {
        // Arrange
        let (client, mut server) = channel_pair().await;
        let env = Envelope::with_timestamp("hello", "10.0.0.2", Some(Identity::from("A")), 9);

        // Act
        client.send(&env).await.unwrap();
        let received = server.receive().await.unwrap();

        // Assert
        assert_eq!(received, env);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_stream_order() {
        let (client, mut server) = channel_pair().await;
        for i in 0..20 {
            client
                .send(&Envelope::with_timestamp(i.to_string(), "h", None, i))
                .await
                .unwrap();
        }
        for i in 0..20u64 {
            assert_eq!(server.receive().await.unwrap().timestamp_ms(), i);
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_soft_and_stream_continues() {
        // Arrange
        let (mut client, mut raw_server) = connected_pair().await;
        raw_server.write_all(b"{not json}\n").await.unwrap();
        raw_server
            .write_all(b"{\"message\":\"ok\",\"senderIp\":\"h\",\"timestamp\":1}\n")
            .await
            .unwrap();

        // Act
        let first = client.receive().await;
        let second = client.receive().await;

        // Assert
        let err = first.unwrap_err();
        assert!(err.is_soft(), "malformed record must be a soft error");
        assert_eq!(second.unwrap().payload(), "ok");
    }

    #[tokio::test]
    async fn test_invalid_utf8_record_is_soft() {
        let (mut client, mut raw_server) = connected_pair().await;
        raw_server.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        raw_server
            .write_all(b"{\"message\":\"ok\",\"senderIp\":\"h\",\"timestamp\":1}\n")
            .await
            .unwrap();

        assert!(matches!(
            client.receive().await,
            Err(ChannelError::Malformed(_))
        ));
        assert_eq!(client.receive().await.unwrap().payload(), "ok");
    }

    #[tokio::test]
    async fn test_peer_eof_yields_closed() {
        let (mut client, raw_server) = connected_pair().await;
        drop(raw_server);
        assert!(matches!(client.receive().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        // Arrange – nobody ever writes to the client.
        let (client, _raw_server) = connected_pair().await;
        let (mut reader, handle) = client.into_split();
        let pending = tokio::spawn(async move { reader.receive().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        handle.close();

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("receive must unblock promptly")
            .unwrap();
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_send_fails_afterwards() {
        let (client, _raw_server) = connected_pair().await;
        client.close();
        client.close();
        assert!(client.handle().is_closed());
        let result = client.send(&Envelope::new("x", "h", None)).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_close_sends_eof_to_peer() {
        let (client, mut server) = channel_pair().await;
        client.close();
        assert!(matches!(server.receive().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        // Arrange
        let (client, mut server) = channel_pair().await;
        let long = "y".repeat(64 * 1024);
        let mut tasks = Vec::new();
        for i in 0..8u64 {
            let handle = client.handle();
            let payload = long.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .send(&Envelope::with_timestamp(payload, "h", None, i))
                    .await
            }));
        }

        // Act – drain while senders are writing.
        let mut seen = Vec::new();
        for _ in 0..8 {
            let env = server.receive().await.expect("every record must decode");
            assert_eq!(env.payload().len(), long.len());
            seen.push(env.timestamp_ms());
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Assert
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_handles_compare_by_connection() {
        let (a, _ra) = connected_pair().await;
        let (b, _rb) = connected_pair().await;
        assert!(a.handle().same_channel(&a.handle()));
        assert!(!a.handle().same_channel(&b.handle()));
    }
}
