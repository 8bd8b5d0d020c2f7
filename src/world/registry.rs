//! # Character Registry
//!
//! Accounts, their character slots, the global name set and the checkout
//! table, owned by the Character service behind one mutex.
//!
//! ## Invariants
//! - no two live characters share a case-insensitive name; a name is reserved
//!   at create and released only at delete
//! - every live character id maps to exactly one account
//! - a character is checked out by at most one owner at a time, and only that
//!   owner may release it
//!
//! ## Persistence
//! Accounts and id counters are written with bincode to
//! `<data_dir>/accounts.bin`. The name set, the id → account map and the
//! username index are rebuilt on load. Checkouts are not persisted: a restart
//! frees every character.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::handshake::current_timestamp;
use crate::protocol::message::{CharacterRecord, CharacterSummary};

/// Longest accepted character name, in characters.
pub const MAX_NAME_LEN: usize = 16;

/// Save file name inside the data directory.
pub const SAVE_FILE: &str = "accounts.bin";

pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 100.0, 0.0);
pub const STARTING_ZONE: &str = "Starting Zone";
pub const STARTING_CITY: &str = "Starting City";

/// Business failures. Reported to the client, never fatal to a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No free character slot")]
    NoFreeSlot,

    #[error("Character name is already taken")]
    NameTaken,

    #[error("Character name must be 1-16 characters")]
    InvalidName,

    #[error("Character class must not be empty")]
    InvalidClass,

    #[error("Character not found")]
    NotFound,

    #[error("Character belongs to another account")]
    NotOwner,

    #[error("Character is in use")]
    CheckedOut,

    #[error("Character is not checked out by this owner")]
    NotCheckedOut,

    #[error("Unknown account")]
    UnknownAccount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: u32,
    pub username: String,
    pub slots: Vec<Option<CharacterRecord>>,
}

impl Account {
    fn characters(&self) -> impl Iterator<Item = &CharacterRecord> {
        self.slots.iter().flatten()
    }

    fn character_mut(&mut self, id: u32) -> Option<&mut CharacterRecord> {
        self.slots.iter_mut().flatten().find(|c| c.id == id)
    }
}

/// The persisted part of the registry.
#[derive(Serialize, Deserialize)]
struct SavedRegistry {
    accounts: Vec<Account>,
    next_account_id: u32,
    next_character_id: u32,
}

/// Fresh level-1 character at the starting spawn.
pub fn new_character(id: u32, name: &str, class: &str) -> CharacterRecord {
    CharacterRecord {
        id,
        name: name.to_owned(),
        class: class.to_owned(),
        level: 1,
        experience: 0,
        experience_to_next: 1000,
        health: 100.0,
        max_health: 100.0,
        resource: 100.0,
        max_resource: 100.0,
        position: SPAWN_POSITION,
        yaw: 0.0,
        pitch: 0.0,
        zone: STARTING_ZONE.to_owned(),
        city: STARTING_CITY.to_owned(),
        last_saved: 0,
        online: false,
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug)]
pub struct CharacterRegistry {
    max_characters: usize,
    accounts: HashMap<u32, Account>,
    usernames: HashMap<String, u32>,
    names: HashSet<String>,
    owners: HashMap<u32, u32>,
    checkouts: HashMap<u32, String>,
    next_account_id: u32,
    next_character_id: u32,
}

impl CharacterRegistry {
    pub fn new(max_characters: usize) -> Self {
        Self {
            max_characters: max_characters.max(1),
            accounts: HashMap::new(),
            usernames: HashMap::new(),
            names: HashSet::new(),
            owners: HashMap::new(),
            checkouts: HashMap::new(),
            next_account_id: 1,
            next_character_id: 1,
        }
    }

    pub fn max_characters(&self) -> usize {
        self.max_characters
    }

    /// Account id for `username`, creating the account on first sight.
    pub fn ensure_account(&mut self, username: &str) -> u32 {
        if let Some(id) = self.usernames.get(username) {
            return *id;
        }
        let account_id = self.next_account_id;
        self.next_account_id += 1;
        self.accounts.insert(
            account_id,
            Account {
                account_id,
                username: username.to_owned(),
                slots: vec![None; self.max_characters],
            },
        );
        self.usernames.insert(username.to_owned(), account_id);
        info!(account_id, username, "Created account");
        account_id
    }

    pub fn account(&self, account_id: u32) -> Option<&Account> {
        self.accounts.get(&account_id)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn list_characters(&self, account_id: u32) -> Vec<CharacterSummary> {
        self.accounts
            .get(&account_id)
            .map(|a| a.characters().map(CharacterRecord::summary).collect())
            .unwrap_or_default()
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.names.contains(&fold(name))
    }

    pub fn create_character(
        &mut self,
        account_id: u32,
        name: &str,
        class: &str,
    ) -> std::result::Result<CharacterRecord, RegistryError> {
        let name = name.trim();
        let len = name.chars().count();
        if len == 0 || len > MAX_NAME_LEN {
            return Err(RegistryError::InvalidName);
        }
        if class.trim().is_empty() {
            return Err(RegistryError::InvalidClass);
        }

        let folded = fold(name);
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(RegistryError::UnknownAccount)?;
        let slot = account
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::NoFreeSlot)?;
        if self.names.contains(&folded) {
            return Err(RegistryError::NameTaken);
        }

        let id = self.next_character_id;
        self.next_character_id += 1;
        let record = new_character(id, name, class.trim());

        account.slots[slot] = Some(record.clone());
        self.names.insert(folded);
        self.owners.insert(id, account_id);

        info!(account_id, character_id = id, name, "Created character");
        Ok(record)
    }

    pub fn delete_character(
        &mut self,
        account_id: u32,
        character_id: u32,
    ) -> std::result::Result<(), RegistryError> {
        self.check_owner(account_id, character_id)?;
        if self.checkouts.contains_key(&character_id) {
            return Err(RegistryError::CheckedOut);
        }

        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(RegistryError::UnknownAccount)?;
        let slot = account
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|c| c.id == character_id))
            .ok_or(RegistryError::NotFound)?;
        if let Some(record) = slot.take() {
            self.names.remove(&fold(&record.name));
        }
        self.owners.remove(&character_id);

        info!(account_id, character_id, "Deleted character");
        Ok(())
    }

    /// Full record of a character the account owns.
    pub fn select_character(
        &self,
        account_id: u32,
        character_id: u32,
    ) -> std::result::Result<CharacterRecord, RegistryError> {
        self.check_owner(account_id, character_id)?;
        self.get_character_state(character_id)
            .ok_or(RegistryError::NotFound)
    }

    fn check_owner(
        &self,
        account_id: u32,
        character_id: u32,
    ) -> std::result::Result<(), RegistryError> {
        match self.owners.get(&character_id) {
            None => Err(RegistryError::NotFound),
            Some(owner) if *owner != account_id => Err(RegistryError::NotOwner),
            Some(_) => Ok(()),
        }
    }

    /// Username of the account owning a character.
    pub fn owner_of(&self, character_id: u32) -> Option<&str> {
        let account_id = self.owners.get(&character_id)?;
        self.accounts.get(account_id).map(|a| a.username.as_str())
    }

    pub fn get_character_state(&self, character_id: u32) -> Option<CharacterRecord> {
        let account_id = self.owners.get(&character_id)?;
        self.accounts
            .get(account_id)?
            .characters()
            .find(|c| c.id == character_id)
            .cloned()
    }

    /// Replace a character's mutable state. Identity fields (id, name) are
    /// kept from the stored record and `last_saved` is stamped.
    pub fn update_character_state(
        &mut self,
        state: &CharacterRecord,
    ) -> std::result::Result<(), RegistryError> {
        let account_id = *self
            .owners
            .get(&state.id)
            .ok_or(RegistryError::NotFound)?;
        let record = self
            .accounts
            .get_mut(&account_id)
            .and_then(|a| a.character_mut(state.id))
            .ok_or(RegistryError::NotFound)?;

        let name = std::mem::take(&mut record.name);
        *record = state.clone();
        record.name = name;
        record.last_saved = current_timestamp().unwrap_or_default();
        debug!(character_id = state.id, "Character state updated");
        Ok(())
    }

    pub fn set_character_online(
        &mut self,
        character_id: u32,
        online: bool,
    ) -> std::result::Result<(), RegistryError> {
        let account_id = *self
            .owners
            .get(&character_id)
            .ok_or(RegistryError::NotFound)?;
        let record = self
            .accounts
            .get_mut(&account_id)
            .and_then(|a| a.character_mut(character_id))
            .ok_or(RegistryError::NotFound)?;
        record.online = online;
        Ok(())
    }

    /// Mark a character as held by `owner`. Checking out again by the same
    /// owner is a no-op.
    pub fn checkout(
        &mut self,
        character_id: u32,
        owner: &str,
    ) -> std::result::Result<CharacterRecord, RegistryError> {
        let record = self
            .get_character_state(character_id)
            .ok_or(RegistryError::NotFound)?;
        if let Some(holder) = self.checkouts.get(&character_id) {
            if holder != owner {
                return Err(RegistryError::CheckedOut);
            }
        } else {
            self.checkouts.insert(character_id, owner.to_owned());
        }
        self.set_character_online(character_id, true)?;
        debug!(character_id, owner, "Character checked out");
        Ok(CharacterRecord {
            online: true,
            ..record
        })
    }

    pub fn release(
        &mut self,
        character_id: u32,
        owner: &str,
    ) -> std::result::Result<(), RegistryError> {
        if self.holder(character_id) != Some(owner) {
            return Err(RegistryError::NotCheckedOut);
        }
        self.checkouts.remove(&character_id);
        // The character may have been deleted under a stale holder; the
        // release still succeeds
        let _ = self.set_character_online(character_id, false);
        debug!(character_id, owner, "Character released");
        Ok(())
    }

    pub fn holder(&self, character_id: u32) -> Option<&str> {
        self.checkouts.get(&character_id).map(String::as_str)
    }

    /// Release everything held by `owner`, e.g. when a game server's link drops.
    pub fn release_all(&mut self, owner: &str) -> Vec<u32> {
        let held: Vec<u32> = self
            .checkouts
            .iter()
            .filter(|(_, holder)| holder.as_str() == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in &held {
            self.checkouts.remove(id);
            let _ = self.set_character_online(*id, false);
        }
        if !held.is_empty() {
            warn!(owner, count = held.len(), "Released all characters of owner");
        }
        held
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.account_id);
        let saved = SavedRegistry {
            accounts,
            next_account_id: self.next_account_id,
            next_character_id: self.next_character_id,
        };
        Ok(bincode::serialize(&saved)?)
    }

    /// Rebuild a registry from [`to_bytes`](Self::to_bytes) output. Accounts
    /// saved with fewer slots are widened to `max_characters`; extra slots are
    /// kept.
    pub fn from_bytes(bytes: &[u8], max_characters: usize) -> Result<Self> {
        let saved: SavedRegistry = bincode::deserialize(bytes)?;
        let mut registry = Self::new(max_characters);
        registry.next_account_id = saved.next_account_id.max(1);
        registry.next_character_id = saved.next_character_id.max(1);

        for mut account in saved.accounts {
            if account.slots.len() < registry.max_characters {
                account.slots.resize(registry.max_characters, None);
            }
            for record in account.slots.iter_mut().flatten() {
                record.online = false;
                registry.names.insert(fold(&record.name));
                registry.owners.insert(record.id, account.account_id);
            }
            registry
                .usernames
                .insert(account.username.clone(), account.account_id);
            registry.accounts.insert(account.account_id, account);
        }
        Ok(registry)
    }

    /// Load from `<data_dir>/accounts.bin`, or start empty if there is none.
    pub async fn load(data_dir: &Path, max_characters: usize) -> Result<Self> {
        let path = data_dir.join(SAVE_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let registry = Self::from_bytes(&bytes, max_characters)?;
                info!(
                    path = %path.display(),
                    accounts = registry.account_count(),
                    "Loaded character registry"
                );
                Ok(registry)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No saved registry, starting empty");
                Ok(Self::new(max_characters))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write through a temporary file so a crash never leaves a torn save.
pub async fn write_atomically(data_dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join(SAVE_FILE);
    let tmp = data_dir.join(format!("{SAVE_FILE}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "Registry saved");
    Ok(path)
}
