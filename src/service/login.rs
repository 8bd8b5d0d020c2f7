//! # Login Service
//!
//! Checks credentials and hands out session tokens.
//!
//! ## Conversation
//! 1. server → 32-byte random challenge (sealed, not a typed message)
//! 2. client → `LoginRequest` or `RegisterRequest`
//! 3. server → `ConnectResponse`; on success `message` carries the token
//!
//! Bad credentials are answered and the socket stays open, up to
//! `max_failed_logins` per connection. `Disconnect` revokes the token.
//!
//! ## Service links
//! Character and Game servers open with `ServiceAuth` instead of credentials
//! and then ask `SessionCheck` for each token they are shown. Login answers
//! from its session table, so a logged-out token stops working everywhere.
//! [`LoginLink`] is the asking side.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{RealmConfig, SecurityConfig};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{new_challenge, verify_service_key};
use crate::protocol::message::{Message, MessageType};
use crate::protocol::token::TokenAuthority;
use crate::service::session::{Session, SessionState};
use crate::service::{Client, Service};
use crate::transport::session_cache::SessionCache;
use crate::utils::metrics::Metrics;
use crate::utils::password::PasswordHasher;

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const LINKED: &str = "Linked with login server";

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 16;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;
const MAX_CACHED_SESSIONS: usize = 10_000;

/// Accounts every fresh Login server knows.
const SEED_ACCOUNTS: [(&str, &str); 3] = [
    ("test", "test123"),
    ("admin", "admin123"),
    ("player1", "password1"),
];

const PRE_AUTH: &[MessageType] = &[
    MessageType::LoginRequest,
    MessageType::RegisterRequest,
    MessageType::ServiceAuth,
    MessageType::Disconnect,
];
const POST_AUTH: &[MessageType] = &[MessageType::Disconnect];
const PEER_MESSAGES: &[MessageType] = &[MessageType::SessionCheck, MessageType::Disconnect];

pub fn validate_username(username: &str) -> std::result::Result<(), &'static str> {
    if username.is_empty() {
        return Err("Username cannot be empty");
    }
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len()) {
        return Err("Username must be between 3 and 16 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("Username can only contain letters, numbers, and underscores");
    }
    Ok(())
}

pub fn validate_password(password: &str) -> std::result::Result<(), &'static str> {
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
        return Err("Password must be between 8 and 64 characters");
    }
    if password.contains('\0') {
        return Err("Password contains invalid characters");
    }
    Ok(())
}

pub struct LoginService {
    accounts: Mutex<HashMap<String, String>>,
    hasher: PasswordHasher,
    tokens: TokenAuthority,
    sessions: SessionCache,
    service_key: String,
    max_failed_logins: u32,
    metrics: Arc<Metrics>,
}

impl LoginService {
    pub fn new(config: &RealmConfig) -> Result<Self> {
        Self::with_hasher(config, PasswordHasher::default())
    }

    /// Service whose password hashes use `hasher`.
    pub fn with_hasher(config: &RealmConfig, hasher: PasswordHasher) -> Result<Self> {
        let mut accounts = HashMap::new();
        for (username, password) in SEED_ACCOUNTS {
            accounts.insert(username.to_owned(), hasher.hash(password)?);
        }
        Ok(Self {
            accounts: Mutex::new(accounts),
            hasher,
            tokens: TokenAuthority::new(
                config.security.shared_secret.as_bytes(),
                config.security.token_ttl,
            ),
            sessions: SessionCache::new(MAX_CACHED_SESSIONS, config.security.token_ttl),
            service_key: config.security.service_key.clone(),
            max_failed_logins: config.accounts.max_failed_logins,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Username of the live session behind `token`; `None` once it logged
    /// out or expired.
    pub async fn session_user(&self, token: &str) -> Option<String> {
        self.sessions.get(token).await
    }

    pub async fn account_exists(&self, username: &str) -> bool {
        self.accounts.lock().await.contains_key(username)
    }

    async fn check_credentials(&self, username: &str, password: &str) -> bool {
        // Validation runs before the lookup so malformed names never reach
        // the table; password rules only apply at registration
        if validate_username(username).is_err() || password.is_empty() {
            return false;
        }
        let stored = self.accounts.lock().await.get(username).cloned();
        match stored {
            Some(stored) => self.hasher.verify(password, &stored),
            None => false,
        }
    }

    async fn register(&self, username: &str, password: &str) -> std::result::Result<(), String> {
        validate_username(username).map_err(str::to_owned)?;
        validate_password(password).map_err(str::to_owned)?;
        let hash = self
            .hasher
            .hash(password)
            .map_err(|e| format!("Failed to hash password: {e}"))?;

        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(username) {
            return Err("Username already exists".into());
        }
        accounts.insert(username.to_owned(), hash);
        info!(username, "Account registered");
        Ok(())
    }

    async fn start_session(&self, session: &mut Session, username: &str) -> Result<()> {
        let token = self.tokens.issue(username)?;
        self.sessions.store(token.clone(), username).await;
        session.authenticate(username);
        session.token = Some(token.clone());
        self.metrics.session_authenticated();
        session
            .send(&Message::response(true, session.id, token))
            .await
    }

    async fn serve_peer(
        &self,
        session: &mut Session,
        service_key: &str,
        instance: String,
    ) -> Result<()> {
        if !verify_service_key(service_key, &self.service_key) || instance.is_empty() {
            self.metrics.auth_failure();
            return Err(ProtocolError::AuthenticationFailed(constants::ERR_SERVICE_KEY));
        }
        info!(instance = %instance, "Service linked");
        session.authenticate(instance.clone());
        self.metrics.session_authenticated();
        session.send(&Message::response(true, 0, LINKED)).await?;

        loop {
            match session.recv_expecting(PEER_MESSAGES).await? {
                Message::SessionCheck { token } => {
                    let reply = match self.session_user(&token).await {
                        Some(username) => Message::response(true, 0, username),
                        None => Message::response(false, 0, constants::ERR_SESSION_ENDED),
                    };
                    session.send(&reply).await?;
                }
                Message::Disconnect => {
                    info!(instance = %instance, "Service unlinked");
                    return Ok(());
                }
                _ => return Err(ProtocolError::UnexpectedMessage),
            }
        }
    }
}

/// Asks a Login service whether session tokens are still logged in. The link
/// is opened on first use and reopened after a failure.
pub struct LoginLink {
    address: String,
    security: SecurityConfig,
    instance: String,
    link: Mutex<Option<Client>>,
}

impl LoginLink {
    pub fn new(address: impl Into<String>, security: SecurityConfig, instance: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            security,
            instance: instance.into(),
            link: Mutex::new(None),
        }
    }

    async fn open_link(&self) -> Result<Client> {
        let mut client = Client::connect(&self.address, &self.security).await?;
        client.await_challenge().await?;
        let reply = client
            .request(&Message::ServiceAuth {
                service_key: self.security.service_key.clone(),
                instance: self.instance.clone(),
            })
            .await?;
        match reply {
            Message::ConnectResponse { accepted: true, .. } => {
                info!(address = %self.address, instance = %self.instance, "Login link established");
                Ok(client)
            }
            Message::ConnectResponse { message, .. } => Err(ProtocolError::HandshakeError(message)),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Username Login holds for `token`, `None` if it is not logged in.
    pub async fn session_user(&self, token: &str) -> Result<Option<String>> {
        let mut link = self.link.lock().await;
        // Login may have timed out an idle link, so a reused one gets a retry
        let attempts = if link.is_some() { 2 } else { 1 };
        let mut failure = ProtocolError::ConnectionClosed;
        for _ in 0..attempts {
            if link.is_none() {
                *link = Some(self.open_link().await?);
            }
            let Some(client) = link.as_mut() else {
                break;
            };
            let reply = client
                .request(&Message::SessionCheck {
                    token: token.to_owned(),
                })
                .await;
            match reply {
                Ok(Message::ConnectResponse {
                    accepted: true,
                    message,
                    ..
                }) => return Ok(Some(message)),
                Ok(Message::ConnectResponse { accepted: false, .. }) => return Ok(None),
                Ok(_) => failure = ProtocolError::UnexpectedMessage,
                Err(e) => {
                    warn!(error = %e, "Login link lost");
                    failure = e;
                }
            }
            *link = None;
        }
        Err(failure)
    }

    /// Succeeds only while `token`, already verified as `username`'s, is
    /// still logged in.
    pub async fn confirm(&self, token: &str, username: &str) -> Result<()> {
        match self.session_user(token).await? {
            Some(live) if live == username => Ok(()),
            _ => Err(ProtocolError::AuthenticationFailed(
                constants::ERR_SESSION_ENDED,
            )),
        }
    }

    pub async fn close(&self) {
        if let Some(client) = self.link.lock().await.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Login link already closed");
            }
        }
    }
}

impl Service for LoginService {
    const NAME: &'static str = "login";

    #[instrument(skip_all, fields(session = session.id, peer = %session.peer))]
    async fn handle(self: Arc<Self>, mut session: Session) -> Result<()> {
        session.state = SessionState::AwaitingCredentials;
        let challenge = new_challenge()?;
        session.writer.send_raw(&challenge).await?;

        let mut failures = 0u32;
        loop {
            let allowed = if session.is_authenticated() {
                POST_AUTH
            } else {
                PRE_AUTH
            };
            match session.recv_expecting(allowed).await? {
                Message::LoginRequest { username, password } => {
                    if self.check_credentials(&username, &password).await {
                        info!(username = %username, "Login successful");
                        self.start_session(&mut session, &username).await?;
                        continue;
                    }

                    failures += 1;
                    self.metrics.auth_failure();
                    warn!(username = %username, failures, "Login failed");
                    session
                        .send(&Message::response(false, 0, INVALID_CREDENTIALS))
                        .await?;
                    if failures >= self.max_failed_logins {
                        return Err(ProtocolError::AuthenticationFailed(
                            constants::ERR_TOO_MANY_ATTEMPTS,
                        ));
                    }
                }
                Message::RegisterRequest { username, password } => {
                    match self.register(&username, &password).await {
                        Ok(()) => self.start_session(&mut session, &username).await?,
                        Err(reason) => {
                            session.send(&Message::response(false, 0, reason)).await?;
                        }
                    }
                }
                Message::ServiceAuth {
                    service_key,
                    instance,
                } => {
                    return self.serve_peer(&mut session, &service_key, instance).await;
                }
                Message::Disconnect => {
                    if let Some(token) = session.token.take() {
                        self.sessions.revoke(&token).await;
                    }
                    return Ok(());
                }
                _ => return Err(ProtocolError::UnexpectedMessage),
            }
        }
    }

    fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    async fn on_shutdown(&self) -> Result<()> {
        let stats = self.sessions.stats().await;
        info!(
            live = stats.total_entries - stats.expired_count,
            expired = stats.expired_count,
            issued = stats.total_inserts,
            "Session table at shutdown"
        );
        Ok(())
    }
}
