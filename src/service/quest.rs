//! # Quest Service
//!
//! Serves the quest catalog and tracks each player's progress, keyed by the
//! player name given at connect. Progress lives for the life of the process.
//!
//! After `ConnectRequest` the client gets the quests open at its level.
//! `AcceptQuest`, `QuestProgress` and `AbandonQuest` are each answered with a
//! `QuestStatus`; a refused operation is reported as the quest's current
//! status, or `Failed` with no objectives when the quest is unknown or
//! locked. A `QuestList` from the client asks for the list again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::RealmConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, MessageType, QuestStatus};
use crate::service::chat::{is_valid_player_name, INVALID_NAME};
use crate::service::session::Session;
use crate::service::Service;
use crate::utils::metrics::Metrics;
use crate::world::quest::{QuestCatalog, QuestError, QuestLog, QuestProgress};

pub const CONNECTED: &str = "Connected to quest server";

/// Level assumed for every player until the game reports real levels.
pub const DEFAULT_PLAYER_LEVEL: u32 = 1;

const QUEST_MESSAGES: &[MessageType] = &[
    MessageType::QuestList,
    MessageType::AcceptQuest,
    MessageType::QuestProgress,
    MessageType::AbandonQuest,
    MessageType::Disconnect,
];

#[derive(Debug)]
struct PlayerQuests {
    level: u32,
    log: QuestLog,
}

fn player_entry<'a>(
    players: &'a mut HashMap<String, PlayerQuests>,
    player: &str,
) -> &'a mut PlayerQuests {
    players
        .entry(player.to_owned())
        .or_insert_with(|| PlayerQuests {
            level: DEFAULT_PLAYER_LEVEL,
            log: QuestLog::default(),
        })
}

pub struct QuestService {
    catalog: QuestCatalog,
    players: Mutex<HashMap<String, PlayerQuests>>,
    metrics: Arc<Metrics>,
}

impl QuestService {
    pub fn new(_config: &RealmConfig) -> Self {
        Self::with_catalog(QuestCatalog::seeded())
    }

    pub fn with_catalog(catalog: QuestCatalog) -> Self {
        Self {
            catalog,
            players: Mutex::new(HashMap::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn catalog(&self) -> &QuestCatalog {
        &self.catalog
    }

    /// Set the level used for `player`'s level requirements.
    pub async fn set_level(&self, player: &str, level: u32) {
        player_entry(&mut *self.players.lock().await, player).level = level;
    }

    async fn quest_list(&self, player: &str) -> Message {
        let mut players = self.players.lock().await;
        let entry = player_entry(&mut players, player);
        let quests = self
            .catalog
            .available_for(entry.level)
            .map(|q| q.summary(entry.log.status(q.id)))
            .collect();
        Message::QuestList(quests)
    }

    fn status_message(&self, progress: &QuestProgress) -> Message {
        let objectives = self
            .catalog
            .get(progress.quest_id)
            .map(|quest| progress.objectives(quest))
            .unwrap_or_default();
        Message::QuestStatus {
            quest_id: progress.quest_id,
            status: progress.status,
            objectives,
        }
    }

    /// Reply for a refused operation on `quest_id`.
    fn refusal(&self, log: &QuestLog, quest_id: u32, error: &QuestError) -> Message {
        debug!(quest_id, error = %error, "Quest operation refused");
        let status = match error {
            QuestError::UnknownQuest(_) | QuestError::LevelTooLow { .. } => QuestStatus::Failed,
            QuestError::AlreadyAccepted | QuestError::NotAccepted => match log.progress(quest_id) {
                Some(progress) => return self.status_message(progress),
                None => QuestStatus::Available,
            },
        };
        Message::QuestStatus {
            quest_id,
            status,
            objectives: Vec::new(),
        }
    }

    async fn apply(&self, player: &str, request: Message) -> Message {
        let mut players = self.players.lock().await;
        let entry = player_entry(&mut players, player);
        let level = entry.level;
        let log = &mut entry.log;

        let (quest_id, outcome) = match request {
            Message::AcceptQuest { quest_id } => (
                quest_id,
                log.accept(&self.catalog, quest_id, level).cloned(),
            ),
            Message::QuestProgress {
                quest_id,
                target,
                amount,
            } => (
                quest_id,
                log.record_progress(&self.catalog, quest_id, &target, amount)
                    .cloned(),
            ),
            Message::AbandonQuest { quest_id } => {
                let outcome = log.abandon(quest_id).map(|()| QuestProgress {
                    quest_id,
                    status: QuestStatus::Available,
                    current: Vec::new(),
                });
                (quest_id, outcome)
            }
            _ => {
                return Message::QuestStatus {
                    quest_id: 0,
                    status: QuestStatus::Failed,
                    objectives: Vec::new(),
                }
            }
        };

        match outcome {
            Ok(progress) if progress.current.is_empty() => Message::QuestStatus {
                quest_id,
                status: progress.status,
                objectives: Vec::new(),
            },
            Ok(progress) => self.status_message(&progress),
            Err(e) => self.refusal(log, quest_id, &e),
        }
    }
}

impl Service for QuestService {
    const NAME: &'static str = "quest";

    #[instrument(skip_all, fields(session = session.id, peer = %session.peer))]
    async fn handle(self: Arc<Self>, mut session: Session) -> Result<()> {
        let Message::ConnectRequest { player_name, .. } = session
            .recv_expecting(&[MessageType::ConnectRequest])
            .await?
        else {
            return Err(ProtocolError::UnexpectedMessage);
        };
        if !is_valid_player_name(&player_name) {
            session
                .send(&Message::response(false, 0, INVALID_NAME))
                .await?;
            return Ok(());
        }
        session.authenticate(player_name.clone());
        self.metrics.session_authenticated();
        session
            .send(&Message::response(true, session.id, CONNECTED))
            .await?;
        session.send(&self.quest_list(&player_name).await).await?;

        loop {
            let reply = match session.recv_expecting(QUEST_MESSAGES).await? {
                Message::QuestList(_) => self.quest_list(&player_name).await,
                Message::Disconnect => return Ok(()),
                request => self.apply(&player_name, request).await,
            };
            session.send(&reply).await?;
        }
    }

    fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
