//! Game state owned by the services: characters, players and quests.

pub mod player;
pub mod quest;
pub mod registry;
pub mod store;

pub use player::ServerPlayer;
pub use quest::{QuestCatalog, QuestLog};
pub use registry::{CharacterRegistry, RegistryError};
pub use store::{CharacterStore, LocalCharacterStore, RemoteCharacterStore, StoreError};
