//! # Error Types
//!
//! Error handling for the wire protocol and the services built on it.
//!
//! This module defines the transport and protocol error variants that can end
//! a connection, from low-level I/O failures to validator rejections and
//! failed authentication. Business failures (duplicate character names, full
//! rosters) live in [`crate::world::registry::RegistryError`] and never end a
//! connection.
//!
//! ## Error Categories
//! - **Transport**: socket failures, resets, read deadlines
//! - **Protocol**: bad frame lengths, validator rejections, unexpected messages
//! - **Cryptographic**: sealing/opening failures, replayed sequences, bad tokens
//! - **Startup**: configuration and persistence failures
//!
//! ## Example Usage
//! ```rust
//! use realm_net::error::{ProtocolError, Result};
//! use tracing::{debug, warn};
//!
//! fn classify(result: Result<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(e) if e.is_transport() => debug!(error = %e, "Peer went away"),
//!         Err(e) => warn!(error = %e, "Dropping connection"),
//!     }
//! }
//!
//! classify(Err(ProtocolError::ConnectionClosed));
//! ```

use std::io;

use thiserror::Error;

use crate::protocol::validator::ValidationResult;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame errors
    pub const ERR_EMPTY_FRAME: &str = "Frame declared a zero-length payload";
    pub const ERR_OVERSIZED_FRAME: &str = "Frame exceeds maximum size";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_CONNECTION_TIMEOUT: &str = "Connection timed out (no activity)";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_SEQUENCE_REPLAY: &str = "Frame sequence not strictly increasing";
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";

    /// Session errors
    pub const ERR_UNEXPECTED_MESSAGE: &str = "Unexpected message type";
    pub const ERR_NOT_AUTHENTICATED: &str = "Message received before authentication";
    pub const ERR_INVALID_TOKEN: &str = "Session token rejected";
    pub const ERR_TOKEN_EXPIRED: &str = "Session token expired";
    pub const ERR_SESSION_ENDED: &str = "Session has been logged out";
    pub const ERR_SERVICE_KEY: &str = "Service key rejected";
    pub const ERR_TOO_MANY_ATTEMPTS: &str = "Too many failed login attempts";

    /// Wire decoding errors
    pub const ERR_TRUNCATED: &str = "Payload ended before all fields were read";
    pub const ERR_BAD_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_TRAILING_BYTES: &str = "Payload has trailing bytes";
}

/// ProtocolError is the primary error type for all connection-level operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] bincode::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Frame declared a zero-length payload")]
    EmptyFrame,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Packet rejected by validator: {0:?}")]
    InvalidPacket(ValidationResult),

    #[error("Malformed payload: {0}")]
    Malformed(&'static str),

    #[error("Unknown message type tag: {0}")]
    UnknownMessageType(u8),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Replay detected: sequence {received} after {last}")]
    ReplayDetected { last: u64, received: u64 },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for failures caused by the peer or the network going away.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::ConnectionTimeout
                | ProtocolError::Timeout
        )
    }

    /// True for failures caused by a peer that broke the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::EmptyFrame
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::InvalidPacket(_)
                | ProtocolError::Malformed(_)
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::DecryptionFailure
                | ProtocolError::ReplayDetected { .. }
                | ProtocolError::UnexpectedMessage
                | ProtocolError::AuthenticationFailed(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
