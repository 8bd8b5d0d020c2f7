//! Quest catalog and per-player quest progress.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::info;

use crate::protocol::message::{QuestStatus, QuestSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestKind {
    Main,
    Side,
    Daily,
    Repeatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    KillMonsters,
    CollectItems,
    ExploreLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objective {
    pub kind: ObjectiveKind,
    pub description: String,
    pub target: String,
    pub required: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reward {
    pub experience: u32,
    pub gold: u32,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quest {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub kind: QuestKind,
    pub required_level: u32,
    pub objectives: Vec<Objective>,
    pub reward: Reward,
}

impl Quest {
    pub fn summary(&self, status: QuestStatus) -> QuestSummary {
        QuestSummary {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            required_level: self.required_level,
            status,
        }
    }
}

fn objective(kind: ObjectiveKind, description: &str, target: &str, required: u32) -> Objective {
    Objective {
        kind,
        description: description.to_owned(),
        target: target.to_owned(),
        required,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuestError {
    #[error("Unknown quest {0}")]
    UnknownQuest(u32),

    #[error("Quest requires level {required}")]
    LevelTooLow { required: u32 },

    #[error("Quest already accepted")]
    AlreadyAccepted,

    #[error("Quest not accepted")]
    NotAccepted,
}

/// All quests the server offers, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct QuestCatalog {
    quests: BTreeMap<u32, Quest>,
}

impl QuestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The starter quests every server ships with.
    pub fn seeded() -> Self {
        let mut catalog = Self::new();
        catalog.insert(Quest {
            id: 1,
            title: "Zombie Slayer I".into(),
            description: "Defeat 10 zombies in the forest".into(),
            kind: QuestKind::Main,
            required_level: 1,
            objectives: vec![objective(
                ObjectiveKind::KillMonsters,
                "Kill zombies",
                "zombie",
                10,
            )],
            reward: Reward {
                experience: 100,
                gold: 50,
                items: vec!["health_potion".into()],
            },
        });
        catalog.insert(Quest {
            id: 2,
            title: "Gather Resources".into(),
            description: "Collect 20 wood blocks".into(),
            kind: QuestKind::Side,
            required_level: 1,
            objectives: vec![objective(
                ObjectiveKind::CollectItems,
                "Collect wood",
                "wood",
                20,
            )],
            reward: Reward {
                experience: 50,
                gold: 25,
                items: Vec::new(),
            },
        });
        catalog.insert(Quest {
            id: 3,
            title: "Dungeon Explorer".into(),
            description: "Explore the dark cavern and defeat the boss".into(),
            kind: QuestKind::Main,
            required_level: 5,
            objectives: vec![
                objective(
                    ObjectiveKind::ExploreLocation,
                    "Explore Dark Cavern",
                    "dark_cavern",
                    1,
                ),
                objective(
                    ObjectiveKind::KillMonsters,
                    "Defeat Cave Troll",
                    "cave_troll",
                    1,
                ),
            ],
            reward: Reward {
                experience: 500,
                gold: 250,
                items: vec!["rare_sword".into(), "magic_ring".into()],
            },
        });
        catalog
    }

    pub fn insert(&mut self, quest: Quest) {
        self.quests.insert(quest.id, quest);
    }

    pub fn get(&self, id: u32) -> Option<&Quest> {
        self.quests.get(&id)
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }

    /// Quests a player of `level` may see, in id order.
    pub fn available_for(&self, level: u32) -> impl Iterator<Item = &Quest> {
        self.quests
            .values()
            .filter(move |q| q.required_level <= level)
    }
}

/// One player's state on one quest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestProgress {
    pub quest_id: u32,
    pub status: QuestStatus,
    /// Current count per objective, same order as the quest's objectives.
    pub current: Vec<u32>,
}

impl QuestProgress {
    fn start(quest: &Quest) -> Self {
        Self {
            quest_id: quest.id,
            status: QuestStatus::InProgress,
            current: vec![0; quest.objectives.len()],
        }
    }

    /// Add `amount` to the first objective targeting `target`, clamped at its
    /// required count. Returns whether anything changed.
    fn record(&mut self, quest: &Quest, target: &str, amount: u32) -> bool {
        if self.status != QuestStatus::InProgress {
            return false;
        }
        let Some(index) = quest.objectives.iter().position(|o| o.target == target) else {
            return false;
        };
        let required = quest.objectives[index].required;
        let before = self.current[index];
        self.current[index] = before.saturating_add(amount).min(required);

        if self
            .current
            .iter()
            .zip(&quest.objectives)
            .all(|(current, o)| *current >= o.required)
        {
            self.status = QuestStatus::Completed;
        }
        self.current[index] != before
    }

    /// `(current, required)` per objective.
    pub fn objectives(&self, quest: &Quest) -> Vec<(u32, u32)> {
        self.current
            .iter()
            .zip(&quest.objectives)
            .map(|(current, o)| (*current, o.required))
            .collect()
    }
}

/// Quest progress of one player.
#[derive(Debug, Clone, Default)]
pub struct QuestLog {
    entries: HashMap<u32, QuestProgress>,
}

impl QuestLog {
    pub fn status(&self, quest_id: u32) -> QuestStatus {
        self.entries
            .get(&quest_id)
            .map_or(QuestStatus::Available, |p| p.status)
    }

    pub fn progress(&self, quest_id: u32) -> Option<&QuestProgress> {
        self.entries.get(&quest_id)
    }

    pub fn accept(
        &mut self,
        catalog: &QuestCatalog,
        quest_id: u32,
        level: u32,
    ) -> Result<&QuestProgress, QuestError> {
        let quest = catalog
            .get(quest_id)
            .ok_or(QuestError::UnknownQuest(quest_id))?;
        if quest.required_level > level {
            return Err(QuestError::LevelTooLow {
                required: quest.required_level,
            });
        }
        if self.entries.contains_key(&quest_id) {
            return Err(QuestError::AlreadyAccepted);
        }
        Ok(self
            .entries
            .entry(quest_id)
            .or_insert_with(|| QuestProgress::start(quest)))
    }

    pub fn abandon(&mut self, quest_id: u32) -> Result<(), QuestError> {
        if self.status(quest_id) != QuestStatus::InProgress {
            return Err(QuestError::NotAccepted);
        }
        self.entries.remove(&quest_id);
        Ok(())
    }

    pub fn record_progress(
        &mut self,
        catalog: &QuestCatalog,
        quest_id: u32,
        target: &str,
        amount: u32,
    ) -> Result<&QuestProgress, QuestError> {
        let quest = catalog
            .get(quest_id)
            .ok_or(QuestError::UnknownQuest(quest_id))?;
        let progress = self
            .entries
            .get_mut(&quest_id)
            .ok_or(QuestError::NotAccepted)?;
        if progress.record(quest, target, amount) && progress.status == QuestStatus::Completed {
            info!(quest_id, title = %quest.title, "Quest completed");
        }
        Ok(progress)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_catalog() {
        let catalog = QuestCatalog::seeded();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.available_for(1).count(), 2);
        assert_eq!(catalog.available_for(5).count(), 3);
        let dungeon = catalog.get(3).unwrap();
        assert_eq!(dungeon.objectives.len(), 2);
        assert_eq!(dungeon.reward.items, vec!["rare_sword", "magic_ring"]);
    }

    #[test]
    fn test_progress_clamps_and_completes() {
        let catalog = QuestCatalog::seeded();
        let mut log = QuestLog::default();
        log.accept(&catalog, 1, 1).unwrap();

        let p = log.record_progress(&catalog, 1, "zombie", 4).unwrap();
        assert_eq!(p.status, QuestStatus::InProgress);
        assert_eq!(p.current, vec![4]);

        let p = log.record_progress(&catalog, 1, "zombie", 50).unwrap();
        assert_eq!(p.current, vec![10]);
        assert_eq!(p.status, QuestStatus::Completed);

        // Completed quests no longer move
        let p = log.record_progress(&catalog, 1, "zombie", 1).unwrap();
        assert_eq!(p.current, vec![10]);
    }

    #[test]
    fn test_multi_objective_needs_all() {
        let catalog = QuestCatalog::seeded();
        let mut log = QuestLog::default();
        log.accept(&catalog, 3, 5).unwrap();

        log.record_progress(&catalog, 3, "dark_cavern", 1).unwrap();
        assert_eq!(log.status(3), QuestStatus::InProgress);
        let p = log.record_progress(&catalog, 3, "cave_troll", 1).unwrap();
        assert_eq!(p.status, QuestStatus::Completed);
        assert_eq!(p.objectives(catalog.get(3).unwrap()), vec![(1, 1), (1, 1)]);
    }

    #[test]
    fn test_unknown_target_is_ignored() {
        let catalog = QuestCatalog::seeded();
        let mut log = QuestLog::default();
        log.accept(&catalog, 2, 1).unwrap();
        let p = log.record_progress(&catalog, 2, "stone", 5).unwrap();
        assert_eq!(p.current, vec![0]);
    }

    #[test]
    fn test_accept_rules() {
        let catalog = QuestCatalog::seeded();
        let mut log = QuestLog::default();
        assert_eq!(
            log.accept(&catalog, 3, 1).unwrap_err(),
            QuestError::LevelTooLow { required: 5 }
        );
        assert_eq!(log.accept(&catalog, 9, 1).unwrap_err(), QuestError::UnknownQuest(9));
        log.accept(&catalog, 1, 1).unwrap();
        assert_eq!(log.accept(&catalog, 1, 1).unwrap_err(), QuestError::AlreadyAccepted);
        assert_eq!(
            log.record_progress(&catalog, 2, "wood", 1).unwrap_err(),
            QuestError::NotAccepted
        );
    }

    #[test]
    fn test_abandon_resets() {
        let catalog = QuestCatalog::seeded();
        let mut log = QuestLog::default();
        log.accept(&catalog, 2, 1).unwrap();
        log.record_progress(&catalog, 2, "wood", 7).unwrap();
        log.abandon(2).unwrap();
        assert_eq!(log.status(2), QuestStatus::Available);
        assert_eq!(log.abandon(2), Err(QuestError::NotAccepted));
        assert_eq!(log.accept(&catalog, 2, 1).unwrap().current, vec![0]);
    }
}
