//! Client side of the realm protocol.
//!
//! Used by game servers to reach the Character service, and by the
//! integration tests to drive every service the way a game client would.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::config::SecurityConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::check_challenge;
use crate::protocol::message::{Message, MessageType};
use crate::service::session::{split_stream, SessionReader, SessionSettings, SessionWriter};
use crate::utils::crypto::{cipher_pair, Role};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

pub struct Client {
    reader: SessionReader,
    writer: SessionWriter,
}

impl Client {
    /// Connect with the cipher and secret from `security`.
    #[instrument(skip(security))]
    pub async fn connect(addr: &str, security: &SecurityConfig) -> Result<Self> {
        Self::connect_with_timeout(addr, security, DEFAULT_TIMEOUT).await
    }

    /// Connect, waiting at most `reply_timeout` for any later reply.
    pub async fn connect_with_timeout(
        addr: &str,
        security: &SecurityConfig,
        reply_timeout: Duration,
    ) -> Result<Self> {
        let stream =
            with_timeout_error(async { Ok(TcpStream::connect(addr).await?) }, DEFAULT_TIMEOUT)
                .await?;
        stream.set_nodelay(true)?;

        let ciphers = cipher_pair(
            security.cipher,
            security.shared_secret.as_bytes(),
            Role::Client,
        )?;
        let settings = SessionSettings {
            read_timeout: reply_timeout,
            send_timeout: DEFAULT_TIMEOUT,
        };
        let (reader, writer) = split_stream(stream, ciphers, settings, Arc::new(Metrics::new()), None);
        debug!(addr, "Connected");
        Ok(Self { reader, writer })
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.writer.send(message).await
    }

    /// Send raw payload bytes, bypassing message encoding.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.send_raw(payload).await
    }

    pub async fn receive(&mut self) -> Result<Message> {
        self.reader.recv().await
    }

    pub async fn receive_raw(&mut self) -> Result<Vec<u8>> {
        self.reader.recv_raw().await
    }

    /// Send a message and wait for the next reply.
    pub async fn request(&mut self, message: &Message) -> Result<Message> {
        self.send(message).await?;
        self.receive().await
    }

    /// Skip messages until one of type `kind` arrives.
    pub async fn receive_type(&mut self, kind: MessageType) -> Result<Message> {
        loop {
            let msg = self.receive().await?;
            if msg.message_type() == kind {
                return Ok(msg);
            }
        }
    }

    /// Read and check the Login greeting.
    pub async fn await_challenge(&mut self) -> Result<()> {
        let challenge = self.receive_raw().await?;
        check_challenge(&challenge)
    }

    /// Full Login exchange: greeting, credentials, token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        self.await_challenge().await?;
        let reply = self
            .request(&Message::LoginRequest {
                username: username.into(),
                password: password.into(),
            })
            .await?;
        match reply {
            Message::ConnectResponse {
                accepted: true,
                message,
                ..
            } => Ok(message),
            Message::ConnectResponse { message, .. } => Err(ProtocolError::Custom(message)),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Politely end the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        self.writer.send(&Message::Disconnect).await?;
        self.writer.close().await
    }
}
