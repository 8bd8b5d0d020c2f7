//! # Character Service
//!
//! Owns the [`CharacterRegistry`] and serves two kinds of peers:
//!
//! - **players**, who open with `TokenAuth` and then list, create, select and
//!   delete their characters;
//! - **game servers**, who open with `ServiceAuth` and then check characters
//!   out (`LoadCharacter`), push state (`UpdateCharacter`), flush it
//!   (`SaveCharacter`) and hand it back (`ReleaseCharacter`).
//!
//! Business failures are answered with `CharacterResult { success: false }`
//! and never end the connection.
//!
//! With a [`LoginLink`] attached, a player token must also still be logged in
//! at Login; without one the token's own signature and expiry decide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::config::RealmConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::verify_service_key;
use crate::protocol::message::{Message, MessageType};
use crate::protocol::token::TokenAuthority;
use crate::service::login::LoginLink;
use crate::service::session::{Session, SessionState};
use crate::service::Service;
use crate::utils::metrics::{Metrics, Timer};
use crate::world::registry::{write_atomically, CharacterRegistry, RegistryError};

pub const AUTHENTICATED: &str = "Authenticated with character server";

const OPENING: &[MessageType] = &[MessageType::TokenAuth, MessageType::ServiceAuth];

const PLAYER_MESSAGES: &[MessageType] = &[
    MessageType::ListCharacters,
    MessageType::CreateCharacter,
    MessageType::SelectCharacter,
    MessageType::DeleteCharacter,
    MessageType::Disconnect,
];

const SERVICE_MESSAGES: &[MessageType] = &[
    MessageType::LoadCharacter,
    MessageType::UpdateCharacter,
    MessageType::SaveCharacter,
    MessageType::ReleaseCharacter,
    MessageType::Disconnect,
];

fn result(op: MessageType, outcome: std::result::Result<&str, RegistryError>) -> Message {
    match outcome {
        Ok(message) => Message::CharacterResult {
            op,
            success: true,
            message: message.to_owned(),
        },
        Err(e) => Message::CharacterResult {
            op,
            success: false,
            message: e.to_string(),
        },
    }
}

pub struct CharacterService {
    registry: Arc<Mutex<CharacterRegistry>>,
    tokens: TokenAuthority,
    login: Option<LoginLink>,
    service_key: String,
    data_dir: PathBuf,
    save_interval: Duration,
    metrics: Arc<Metrics>,
}

impl CharacterService {
    pub fn new(config: &RealmConfig, registry: CharacterRegistry) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            tokens: TokenAuthority::new(
                config.security.shared_secret.as_bytes(),
                config.security.token_ttl,
            ),
            login: None,
            service_key: config.security.service_key.clone(),
            data_dir: config.persistence.data_dir.clone(),
            save_interval: config.persistence.save_interval,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Service over the registry saved in the configured data directory.
    pub async fn load(config: &RealmConfig) -> Result<Self> {
        let registry = CharacterRegistry::load(
            &config.persistence.data_dir,
            config.accounts.max_characters,
        )
        .await?;
        Ok(Self::new(config, registry))
    }

    /// Check player tokens against a Login service's session table.
    pub fn with_login(mut self, login: LoginLink) -> Self {
        self.login = Some(login);
        self
    }

    async fn authorize(&self, token: &str) -> Result<String> {
        let username = self.tokens.verify(token)?;
        if let Some(login) = &self.login {
            login.confirm(token, &username).await?;
        }
        Ok(username)
    }

    /// Shared handle to the registry, for an in-process game world.
    pub fn registry(&self) -> Arc<Mutex<CharacterRegistry>> {
        self.registry.clone()
    }

    /// Write the registry to disk.
    pub async fn persist(&self) -> Result<PathBuf> {
        let _timer = Timer::start("registry_save");
        let bytes = self.registry.lock().await.to_bytes()?;
        write_atomically(&self.data_dir, &bytes).await
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(error = %e, "Failed to save character registry");
        }
    }

    async fn serve_player(&self, session: &mut Session, token: &str) -> Result<()> {
        let username = match self.authorize(token).await {
            Ok(username) => username,
            Err(e) => {
                self.metrics.auth_failure();
                return Err(e);
            }
        };
        let account_id = self.registry.lock().await.ensure_account(&username);
        session.authenticate(username);
        self.metrics.session_authenticated();

        session
            .send(&Message::response(true, account_id, AUTHENTICATED))
            .await?;
        self.send_list(session, account_id).await?;

        loop {
            match session.recv_expecting(PLAYER_MESSAGES).await? {
                Message::ListCharacters => self.send_list(session, account_id).await?,
                Message::CreateCharacter { name, class } => {
                    let created = self
                        .registry
                        .lock()
                        .await
                        .create_character(account_id, &name, &class);
                    let ok = created.is_ok();
                    session
                        .send(&result(
                            MessageType::CreateCharacter,
                            created.map(|_| "Character created"),
                        ))
                        .await?;
                    if ok {
                        self.persist_logged().await;
                        self.send_list(session, account_id).await?;
                    }
                }
                Message::SelectCharacter { character_id } => {
                    let selected = self
                        .registry
                        .lock()
                        .await
                        .select_character(account_id, character_id);
                    let reply = match selected {
                        Ok(record) => Message::CharacterData(record),
                        Err(e) => result(MessageType::SelectCharacter, Err(e)),
                    };
                    session.send(&reply).await?;
                }
                Message::DeleteCharacter { character_id } => {
                    let deleted = self
                        .registry
                        .lock()
                        .await
                        .delete_character(account_id, character_id);
                    let ok = deleted.is_ok();
                    session
                        .send(&result(
                            MessageType::DeleteCharacter,
                            deleted.map(|_| "Character deleted"),
                        ))
                        .await?;
                    if ok {
                        self.persist_logged().await;
                        self.send_list(session, account_id).await?;
                    }
                }
                Message::Disconnect => return Ok(()),
                _ => return Err(ProtocolError::UnexpectedMessage),
            }
        }
    }

    async fn send_list(&self, session: &mut Session, account_id: u32) -> Result<()> {
        let list = self.registry.lock().await.list_characters(account_id);
        session.send(&Message::CharacterList(list)).await
    }

    async fn serve_game_server(
        &self,
        session: &mut Session,
        service_key: &str,
        instance: String,
    ) -> Result<()> {
        if !verify_service_key(service_key, &self.service_key) || instance.is_empty() {
            self.metrics.auth_failure();
            return Err(ProtocolError::AuthenticationFailed(constants::ERR_SERVICE_KEY));
        }
        info!(instance = %instance, "Game server linked");
        session.authenticate(instance.clone());
        self.metrics.session_authenticated();
        session
            .send(&Message::response(true, 0, AUTHENTICATED))
            .await?;

        loop {
            let reply = match session.recv_expecting(SERVICE_MESSAGES).await? {
                Message::LoadCharacter {
                    character_id,
                    username,
                } => {
                    let mut registry = self.registry.lock().await;
                    let owned = registry.owner_of(character_id).map(|o| o == username);
                    let loaded = match owned {
                        None => Err(RegistryError::NotFound),
                        Some(false) => Err(RegistryError::NotOwner),
                        Some(true) => registry.checkout(character_id, &instance),
                    };
                    match loaded {
                        Ok(record) => Message::CharacterData(record),
                        Err(e) => {
                            debug!(character_id, error = %e, "Load refused");
                            result(MessageType::LoadCharacter, Err(e))
                        }
                    }
                }
                Message::UpdateCharacter(record) => {
                    let mut registry = self.registry.lock().await;
                    let updated = if registry.holder(record.id) == Some(instance.as_str()) {
                        registry.update_character_state(&record)
                    } else {
                        Err(RegistryError::NotCheckedOut)
                    };
                    result(MessageType::UpdateCharacter, updated.map(|_| "Updated"))
                }
                Message::SaveCharacter { character_id } => {
                    let known = self
                        .registry
                        .lock()
                        .await
                        .get_character_state(character_id)
                        .is_some();
                    if known {
                        self.persist().await?;
                        result(MessageType::SaveCharacter, Ok("Saved"))
                    } else {
                        result(MessageType::SaveCharacter, Err(RegistryError::NotFound))
                    }
                }
                Message::ReleaseCharacter { character_id } => {
                    let released = self.registry.lock().await.release(character_id, &instance);
                    result(MessageType::ReleaseCharacter, released.map(|_| "Released"))
                }
                Message::Disconnect => {
                    self.registry.lock().await.release_all(&instance);
                    info!(instance = %instance, "Game server unlinked");
                    return Ok(());
                }
                _ => return Err(ProtocolError::UnexpectedMessage),
            };
            session.send(&reply).await?;
        }
    }
}

impl Service for CharacterService {
    const NAME: &'static str = "character";

    #[instrument(skip_all, fields(session = session.id, peer = %session.peer))]
    async fn handle(self: Arc<Self>, mut session: Session) -> Result<()> {
        session.state = SessionState::AwaitingToken;
        match session.recv_expecting(OPENING).await? {
            Message::TokenAuth { token } => self.serve_player(&mut session, &token).await,
            Message::ServiceAuth {
                service_key,
                instance,
            } => {
                self.serve_game_server(&mut session, &service_key, instance)
                    .await
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn spawn_background(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let service = self;
        let autosave = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.save_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => service.persist_logged().await,
                    _ = shutdown.changed() => break,
                }
            }
        });
        vec![autosave]
    }

    async fn on_shutdown(&self) -> Result<()> {
        if let Some(login) = &self.login {
            login.close().await;
        }
        let path = self.persist().await?;
        info!(path = %path.display(), "Character registry saved");
        Ok(())
    }
}
