//! # realm-net
//!
//! Session, wire-protocol and service layer for a multiplayer voxel RPG back
//! end. Five independent services share one framed, encrypted protocol:
//!
//! | Service   | Default port | Role |
//! |-----------|--------------|------|
//! | Login     | 25564 | credentials → session token |
//! | Game      | 25565 | authoritative world, 60 Hz state broadcast |
//! | Chat      | 25566 | global room with history replay |
//! | Quest     | 25567 | quest catalog and per-player progress |
//! | Character | 25568 | rosters, global names, character hand-off |
//!
//! ## Flow
//! A client logs in, presents the token to Character to pick a character,
//! then joins Game with the character id and the same token. Game checks the
//! character out of Character for as long as the player is in the world.
//!
//! ## Layers
//! ```text
//! core::codec      [u32 LE length][payload] frames
//! utils::crypto    per-direction frame ciphers
//! protocol         validator, typed messages, handshake, tokens
//! service          sessions and the service handlers
//! transport::tcp   accept loop, rate limiting, graceful shutdown
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use realm_net::config::RealmConfig;
//! use realm_net::service::{login::LoginService, Client};
//! use realm_net::transport::spawn;
//!
//! # async fn run() -> realm_net::error::Result<()> {
//! let config = Arc::new(RealmConfig::default());
//! let login = Arc::new(LoginService::new(&config)?);
//! let server = spawn("127.0.0.1:0", login, config.clone()).await?;
//!
//! let mut client = Client::connect(&server.local_addr().to_string(), &config.security).await?;
//! let token = client.login("test", "test123").await?;
//! assert!(token.len() >= 32);
//!
//! server.shutdown().await
//! # }
//! ```

#![deny(clippy::unwrap_used)]

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;
pub mod world;

pub use error::{ProtocolError, Result};
