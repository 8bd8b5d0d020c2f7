//! # Sessions
//!
//! One [`Session`] per accepted TCP connection, owned by that connection's
//! task. It stacks the pieces every service needs between the socket and a
//! typed [`Message`]:
//!
//! ```text
//! socket → FrameCodec → FrameCipher::open → validate → Message::decode
//! Message::encode → FrameCipher::seal → FrameCodec → socket
//! ```
//!
//! Reads run under the service's read deadline and end early when the
//! server's shutdown signal fires. Broadcasting services split the session
//! and hand the writer to [`spawn_writer`], feeding it through a bounded
//! queue so a slow peer never blocks the sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, MessageType};
use crate::protocol::validator::{validate, ValidationResult};
use crate::utils::crypto::{CipherPair, FrameCipher};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{
    with_read_deadline, with_timeout_error, DEFAULT_READ_TIMEOUT, DEFAULT_TIMEOUT,
};

/// Where a connection is in its authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingCredentials,
    AwaitingToken,
    Authenticated,
}

/// Per-connection I/O deadlines.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub read_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            send_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Turn an opened payload into a message, enforcing the validator first.
///
/// `allowed` restricts which types are acceptable at this point of the
/// conversation; anything else is [`ProtocolError::UnexpectedMessage`].
pub fn parse_payload(payload: &[u8], allowed: Option<&[MessageType]>) -> Result<Message> {
    let tag = *payload
        .first()
        .ok_or(ProtocolError::InvalidPacket(ValidationResult::NullData))?;
    let kind = MessageType::try_from(tag)?;
    if let Some(allowed) = allowed {
        if !allowed.contains(&kind) {
            return Err(ProtocolError::UnexpectedMessage);
        }
    }
    match validate(payload, kind) {
        ValidationResult::Valid => Message::decode(payload),
        rejected => Err(ProtocolError::InvalidPacket(rejected)),
    }
}

/// Receiving half of a connection.
pub struct SessionReader {
    frames: FramedRead<OwnedReadHalf, FrameCodec>,
    cipher: Box<dyn FrameCipher>,
    read_timeout: Duration,
    shutdown: Option<watch::Receiver<bool>>,
    metrics: Arc<Metrics>,
}

impl SessionReader {
    /// Next opened payload, before validation.
    pub async fn recv_raw(&mut self) -> Result<Vec<u8>> {
        if let Some(rx) = &self.shutdown {
            if *rx.borrow() {
                return Err(ProtocolError::ConnectionClosed);
            }
        }

        let frames = &mut self.frames;
        let next = with_read_deadline(
            async move {
                frames
                    .next()
                    .await
                    .unwrap_or(Err(ProtocolError::ConnectionClosed))
            },
            self.read_timeout,
        );

        let frame: Bytes = match &mut self.shutdown {
            Some(rx) => tokio::select! {
                frame = next => frame?,
                _ = rx.changed() => return Err(ProtocolError::ConnectionClosed),
            },
            None => next.await?,
        };

        let payload = self.cipher.open(&frame)?;
        self.metrics.message_received(frame.len() as u64);
        trace!(bytes = frame.len(), "Frame opened");
        Ok(payload)
    }

    /// Next message of any known type.
    pub async fn recv(&mut self) -> Result<Message> {
        let payload = self.recv_raw().await?;
        parse_payload(&payload, None)
    }

    /// Next message, which must be one of `allowed`.
    pub async fn recv_expecting(&mut self, allowed: &[MessageType]) -> Result<Message> {
        let payload = self.recv_raw().await?;
        parse_payload(&payload, Some(allowed))
    }
}

/// Sending half of a connection.
pub struct SessionWriter {
    frames: FramedWrite<OwnedWriteHalf, FrameCodec>,
    cipher: Box<dyn FrameCipher>,
    send_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl SessionWriter {
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.send_raw(&msg.encode()).await
    }

    /// Seal and send an already-encoded payload.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        let sealed = Bytes::from(self.cipher.seal(payload)?);
        let len = sealed.len();
        let frames = &mut self.frames;
        with_timeout_error(async move { frames.send(sealed).await }, self.send_timeout).await?;
        self.metrics.message_sent(len as u64);
        Ok(())
    }

    /// Flush and half-close the socket.
    pub async fn close(mut self) -> Result<()> {
        self.frames.close().await
    }
}

/// Split a stream into its reading and writing halves with their ciphers.
pub fn split_stream(
    stream: TcpStream,
    ciphers: CipherPair,
    settings: SessionSettings,
    metrics: Arc<Metrics>,
    shutdown: Option<watch::Receiver<bool>>,
) -> (SessionReader, SessionWriter) {
    let (read_half, write_half) = stream.into_split();
    let reader = SessionReader {
        frames: FramedRead::new(read_half, FrameCodec::new()),
        cipher: ciphers.inbound,
        read_timeout: settings.read_timeout,
        shutdown,
        metrics: metrics.clone(),
    };
    let writer = SessionWriter {
        frames: FramedWrite::new(write_half, FrameCodec::new()),
        cipher: ciphers.outbound,
        send_timeout: settings.send_timeout,
        metrics,
    };
    (reader, writer)
}

/// Server-side state of one connection.
pub struct Session {
    pub id: u32,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub username: Option<String>,
    pub token: Option<String>,
    pub reader: SessionReader,
    pub writer: SessionWriter,
}

impl Session {
    pub fn new(
        id: u32,
        peer: SocketAddr,
        stream: TcpStream,
        ciphers: CipherPair,
        settings: SessionSettings,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (reader, writer) = split_stream(stream, ciphers, settings, metrics, Some(shutdown));
        Self {
            id,
            peer,
            state: SessionState::Connected,
            username: None,
            token: None,
            reader,
            writer,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Record a successful authentication.
    pub fn authenticate(&mut self, username: impl Into<String>) {
        let username = username.into();
        debug!(session = self.id, username = %username, "Session authenticated");
        self.username = Some(username);
        self.state = SessionState::Authenticated;
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> Result<Message> {
        self.reader.recv().await
    }

    pub async fn recv_expecting(&mut self, allowed: &[MessageType]) -> Result<Message> {
        self.reader.recv_expecting(allowed).await
    }
}

/// Sender side of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Message>;

/// Drain `queue` into `writer` until every sender is gone or a send fails.
pub fn spawn_writer(
    mut writer: SessionWriter,
    queue: mpsc::Receiver<Message>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut queue = ReceiverStream::new(queue);
        while let Some(msg) = queue.next().await {
            writer.send(&msg).await?;
        }
        writer.close().await
    })
}
