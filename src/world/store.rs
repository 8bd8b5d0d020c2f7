//! Where the Game service gets its characters from.
//!
//! A game server checks a character out when a player joins, pushes its state
//! back while playing and on leave, and releases it when the player is gone.
//! [`LocalCharacterStore`] talks to a registry in the same process;
//! [`RemoteCharacterStore`] talks to a Character service over an
//! authenticated service link.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::error::ProtocolError;
use crate::protocol::message::{CharacterRecord, Message};
use crate::service::client::Client;
use crate::world::registry::{write_atomically, CharacterRegistry, RegistryError};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The character service refused the operation.
    #[error("{0}")]
    Rejected(String),

    /// The link to the character service failed.
    #[error("Character link failed: {0}")]
    Link(#[from] ProtocolError),
}

impl From<RegistryError> for StoreError {
    fn from(e: RegistryError) -> Self {
        StoreError::Rejected(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Character hand-off as seen from a game server.
pub trait CharacterStore: Send + Sync + 'static {
    /// Check `character_id` out for this game server. Fails unless the
    /// character belongs to `username` and nobody else holds it.
    fn checkout(
        &self,
        character_id: u32,
        username: &str,
    ) -> impl Future<Output = StoreResult<CharacterRecord>> + Send;

    fn update(&self, record: &CharacterRecord) -> impl Future<Output = StoreResult<()>> + Send;

    /// Flush a character's state to disk.
    fn save(&self, character_id: u32) -> impl Future<Output = StoreResult<()>> + Send;

    fn release(&self, character_id: u32) -> impl Future<Output = StoreResult<()>> + Send;

    /// Let go of everything still held.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Store backed by a registry in the same process.
pub struct LocalCharacterStore {
    registry: Arc<Mutex<CharacterRegistry>>,
    owner: String,
    data_dir: PathBuf,
}

impl LocalCharacterStore {
    pub fn new(
        registry: Arc<Mutex<CharacterRegistry>>,
        owner: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            owner: owner.into(),
            data_dir: data_dir.into(),
        }
    }
}

impl CharacterStore for LocalCharacterStore {
    async fn checkout(&self, character_id: u32, username: &str) -> StoreResult<CharacterRecord> {
        let mut registry = self.registry.lock().await;
        match registry.owner_of(character_id).map(|owner| owner == username) {
            None => Err(RegistryError::NotFound.into()),
            Some(false) => Err(RegistryError::NotOwner.into()),
            Some(true) => Ok(registry.checkout(character_id, &self.owner)?),
        }
    }

    async fn update(&self, record: &CharacterRecord) -> StoreResult<()> {
        let mut registry = self.registry.lock().await;
        if registry.holder(record.id) != Some(self.owner.as_str()) {
            return Err(RegistryError::NotCheckedOut.into());
        }
        Ok(registry.update_character_state(record)?)
    }

    async fn save(&self, character_id: u32) -> StoreResult<()> {
        let bytes = {
            let registry = self.registry.lock().await;
            if registry.get_character_state(character_id).is_none() {
                return Err(RegistryError::NotFound.into());
            }
            registry.to_bytes()?
        };
        write_atomically(&self.data_dir, &bytes).await?;
        Ok(())
    }

    async fn release(&self, character_id: u32) -> StoreResult<()> {
        Ok(self.registry.lock().await.release(character_id, &self.owner)?)
    }

    async fn close(&self) {
        self.registry.lock().await.release_all(&self.owner);
    }
}

/// Store backed by a Character service. The link is opened on first use and
/// reopened after a failure.
pub struct RemoteCharacterStore {
    address: String,
    security: SecurityConfig,
    instance: String,
    link: Mutex<Option<Client>>,
}

impl RemoteCharacterStore {
    pub fn new(address: impl Into<String>, security: SecurityConfig, instance: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            security,
            instance: instance.into(),
            link: Mutex::new(None),
        }
    }

    async fn open_link(&self) -> StoreResult<Client> {
        let mut client = Client::connect(&self.address, &self.security).await?;
        let reply = client
            .request(&Message::ServiceAuth {
                service_key: self.security.service_key.clone(),
                instance: self.instance.clone(),
            })
            .await?;
        match reply {
            Message::ConnectResponse { accepted: true, .. } => {
                info!(address = %self.address, instance = %self.instance, "Character link established");
                Ok(client)
            }
            Message::ConnectResponse { message, .. } => Err(StoreError::Rejected(message)),
            _ => Err(ProtocolError::UnexpectedMessage.into()),
        }
    }

    /// One request/reply over the link; a failed link is dropped so the next
    /// call reconnects.
    async fn call(&self, request: Message) -> StoreResult<Message> {
        let mut link = self.link.lock().await;
        if link.is_none() {
            *link = Some(self.open_link().await?);
        }
        let Some(client) = link.as_mut() else {
            return Err(ProtocolError::ConnectionClosed.into());
        };
        match client.request(&request).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(error = %e, "Character link lost");
                *link = None;
                Err(e.into())
            }
        }
    }

    async fn call_for_result(&self, request: Message) -> StoreResult<()> {
        match self.call(request).await? {
            Message::CharacterResult { success: true, .. } => Ok(()),
            Message::CharacterResult { message, .. } => Err(StoreError::Rejected(message)),
            _ => Err(ProtocolError::UnexpectedMessage.into()),
        }
    }
}

impl CharacterStore for RemoteCharacterStore {
    async fn checkout(&self, character_id: u32, username: &str) -> StoreResult<CharacterRecord> {
        let reply = self
            .call(Message::LoadCharacter {
                character_id,
                username: username.to_owned(),
            })
            .await?;
        match reply {
            Message::CharacterData(record) => Ok(record),
            Message::CharacterResult { message, .. } => Err(StoreError::Rejected(message)),
            _ => Err(ProtocolError::UnexpectedMessage.into()),
        }
    }

    async fn update(&self, record: &CharacterRecord) -> StoreResult<()> {
        self.call_for_result(Message::UpdateCharacter(record.clone()))
            .await
    }

    async fn save(&self, character_id: u32) -> StoreResult<()> {
        self.call_for_result(Message::SaveCharacter { character_id })
            .await
    }

    async fn release(&self, character_id: u32) -> StoreResult<()> {
        self.call_for_result(Message::ReleaseCharacter { character_id })
            .await
    }

    async fn close(&self) {
        if let Some(client) = self.link.lock().await.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Character link already closed");
            }
        }
    }
}
