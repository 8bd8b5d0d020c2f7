//! # Protocol Messages
//!
//! Every decrypted payload starts with a one-byte [`MessageType`] tag followed
//! by the fields of that message, little-endian, strings as `u32` length plus
//! UTF-8 bytes. [`Message::encode`] and [`Message::decode`] are exact inverses
//! for every variant.
//!
//! Payloads are decoded only after [`crate::protocol::validator::validate`]
//! has accepted them, but decoding is bounds-checked on its own as well.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{ProtocolError, Result};

/// One-byte message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ConnectRequest = 0,
    ConnectResponse = 1,
    Disconnect = 2,
    LoginRequest = 3,
    RegisterRequest = 4,
    TokenAuth = 5,
    ServiceAuth = 6,
    JoinGame = 7,
    SessionCheck = 8,
    PlayerInput = 10,
    PlayerStateUpdate = 11,
    PlayerSpawn = 12,
    PlayerDespawn = 13,
    Chat = 40,
    QuestList = 50,
    AcceptQuest = 51,
    QuestProgress = 52,
    QuestStatus = 53,
    AbandonQuest = 54,
    ListCharacters = 0x10,
    CreateCharacter = 0x11,
    SelectCharacter = 0x12,
    DeleteCharacter = 0x13,
    LoadCharacter = 0x14,
    SaveCharacter = 0x15,
    UpdateCharacter = 0x16,
    ReleaseCharacter = 0x17,
    CharacterList = 0x20,
    CharacterData = 0x21,
    CharacterResult = 0x22,
}

impl MessageType {
    pub const ALL: [MessageType; 30] = [
        MessageType::ConnectRequest,
        MessageType::ConnectResponse,
        MessageType::Disconnect,
        MessageType::LoginRequest,
        MessageType::RegisterRequest,
        MessageType::TokenAuth,
        MessageType::ServiceAuth,
        MessageType::JoinGame,
        MessageType::SessionCheck,
        MessageType::PlayerInput,
        MessageType::PlayerStateUpdate,
        MessageType::PlayerSpawn,
        MessageType::PlayerDespawn,
        MessageType::Chat,
        MessageType::QuestList,
        MessageType::AcceptQuest,
        MessageType::QuestProgress,
        MessageType::QuestStatus,
        MessageType::AbandonQuest,
        MessageType::ListCharacters,
        MessageType::CreateCharacter,
        MessageType::SelectCharacter,
        MessageType::DeleteCharacter,
        MessageType::LoadCharacter,
        MessageType::SaveCharacter,
        MessageType::UpdateCharacter,
        MessageType::ReleaseCharacter,
        MessageType::CharacterList,
        MessageType::CharacterData,
        MessageType::CharacterResult,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or(ProtocolError::UnknownMessageType(tag))
    }
}

/// Progress state of one quest for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum QuestStatus {
    Available = 0,
    InProgress = 1,
    Completed = 2,
    Failed = 3,
}

impl TryFrom<u8> for QuestStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QuestStatus::Available),
            1 => Ok(QuestStatus::InProgress),
            2 => Ok(QuestStatus::Completed),
            3 => Ok(QuestStatus::Failed),
            _ => Err(ProtocolError::Malformed("unknown quest status")),
        }
    }
}

/// Movement intent sent by a game client.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInput {
    pub player_id: u32,
    pub movement: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub jump: bool,
    pub crouch: bool,
    pub timestamp: u32,
}

/// Authoritative snapshot of one player, broadcast every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub health: f32,
    pub resource: f32,
    pub timestamp: u32,
}

/// One roster line in a character list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSummary {
    pub id: u32,
    pub name: String,
    pub class: String,
    pub level: u32,
}

/// Full persisted state of a character, as handed between Character and Game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: u32,
    pub name: String,
    pub class: String,
    pub level: u32,
    pub experience: u32,
    pub experience_to_next: u32,
    pub health: f32,
    pub max_health: f32,
    pub resource: f32,
    pub max_resource: f32,
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub zone: String,
    pub city: String,
    /// Unix seconds of the last state update pushed by a game server.
    pub last_saved: u64,
    pub online: bool,
}

impl CharacterRecord {
    pub fn summary(&self) -> CharacterSummary {
        CharacterSummary {
            id: self.id,
            name: self.name.clone(),
            class: self.class.clone(),
            level: self.level,
        }
    }

    fn write(&self, w: &mut WireWriter) {
        w.put_u32(self.id)
            .put_str(&self.name)
            .put_str(&self.class)
            .put_u32(self.level)
            .put_u32(self.experience)
            .put_u32(self.experience_to_next)
            .put_f32(self.health)
            .put_f32(self.max_health)
            .put_f32(self.resource)
            .put_f32(self.max_resource)
            .put_vec3(self.position)
            .put_f32(self.yaw)
            .put_f32(self.pitch)
            .put_str(&self.zone)
            .put_str(&self.city)
            .put_u64(self.last_saved)
            .put_bool(self.online);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            id: r.u32()?,
            name: r.string()?,
            class: r.string()?,
            level: r.u32()?,
            experience: r.u32()?,
            experience_to_next: r.u32()?,
            health: r.f32()?,
            max_health: r.f32()?,
            resource: r.f32()?,
            max_resource: r.f32()?,
            position: r.vec3()?,
            yaw: r.f32()?,
            pitch: r.f32()?,
            zone: r.string()?,
            city: r.string()?,
            last_saved: r.u64()?,
            online: r.bool()?,
        })
    }
}

/// One quest line offered to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestSummary {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub required_level: u32,
    pub status: QuestStatus,
}

/// Every message of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ConnectRequest {
        player_id: u32,
        player_name: String,
    },
    ConnectResponse {
        accepted: bool,
        player_id: u32,
        message: String,
    },
    Disconnect,
    LoginRequest {
        username: String,
        password: String,
    },
    RegisterRequest {
        username: String,
        password: String,
    },
    TokenAuth {
        token: String,
    },
    ServiceAuth {
        service_key: String,
        instance: String,
    },
    JoinGame {
        character_id: u32,
        token: String,
    },
    /// A service asking Login whether `token` is still logged in.
    SessionCheck {
        token: String,
    },
    PlayerInput(PlayerInput),
    PlayerStateUpdate(PlayerState),
    PlayerSpawn {
        player_id: u32,
        position: Vec3,
        player_name: String,
        class_name: String,
    },
    PlayerDespawn {
        player_id: u32,
    },
    Chat {
        sender: String,
        message: String,
    },
    QuestList(Vec<QuestSummary>),
    AcceptQuest {
        quest_id: u32,
    },
    QuestProgress {
        quest_id: u32,
        target: String,
        amount: u32,
    },
    QuestStatus {
        quest_id: u32,
        status: QuestStatus,
        /// `(current, required)` per objective.
        objectives: Vec<(u32, u32)>,
    },
    AbandonQuest {
        quest_id: u32,
    },
    ListCharacters,
    CreateCharacter {
        name: String,
        class: String,
    },
    SelectCharacter {
        character_id: u32,
    },
    DeleteCharacter {
        character_id: u32,
    },
    LoadCharacter {
        character_id: u32,
        username: String,
    },
    SaveCharacter {
        character_id: u32,
    },
    UpdateCharacter(CharacterRecord),
    ReleaseCharacter {
        character_id: u32,
    },
    CharacterList(Vec<CharacterSummary>),
    CharacterData(CharacterRecord),
    CharacterResult {
        op: MessageType,
        success: bool,
        message: String,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ConnectRequest { .. } => MessageType::ConnectRequest,
            Message::ConnectResponse { .. } => MessageType::ConnectResponse,
            Message::Disconnect => MessageType::Disconnect,
            Message::LoginRequest { .. } => MessageType::LoginRequest,
            Message::RegisterRequest { .. } => MessageType::RegisterRequest,
            Message::TokenAuth { .. } => MessageType::TokenAuth,
            Message::ServiceAuth { .. } => MessageType::ServiceAuth,
            Message::JoinGame { .. } => MessageType::JoinGame,
            Message::SessionCheck { .. } => MessageType::SessionCheck,
            Message::PlayerInput(_) => MessageType::PlayerInput,
            Message::PlayerStateUpdate(_) => MessageType::PlayerStateUpdate,
            Message::PlayerSpawn { .. } => MessageType::PlayerSpawn,
            Message::PlayerDespawn { .. } => MessageType::PlayerDespawn,
            Message::Chat { .. } => MessageType::Chat,
            Message::QuestList(_) => MessageType::QuestList,
            Message::AcceptQuest { .. } => MessageType::AcceptQuest,
            Message::QuestProgress { .. } => MessageType::QuestProgress,
            Message::QuestStatus { .. } => MessageType::QuestStatus,
            Message::AbandonQuest { .. } => MessageType::AbandonQuest,
            Message::ListCharacters => MessageType::ListCharacters,
            Message::CreateCharacter { .. } => MessageType::CreateCharacter,
            Message::SelectCharacter { .. } => MessageType::SelectCharacter,
            Message::DeleteCharacter { .. } => MessageType::DeleteCharacter,
            Message::LoadCharacter { .. } => MessageType::LoadCharacter,
            Message::SaveCharacter { .. } => MessageType::SaveCharacter,
            Message::UpdateCharacter(_) => MessageType::UpdateCharacter,
            Message::ReleaseCharacter { .. } => MessageType::ReleaseCharacter,
            Message::CharacterList(_) => MessageType::CharacterList,
            Message::CharacterData(_) => MessageType::CharacterData,
            Message::CharacterResult { .. } => MessageType::CharacterResult,
        }
    }

    /// Shorthand for a `ConnectResponse`.
    pub fn response(accepted: bool, player_id: u32, message: impl Into<String>) -> Self {
        Message::ConnectResponse {
            accepted,
            player_id,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_tag(self.message_type().tag());
        match self {
            Message::ConnectRequest {
                player_id,
                player_name,
            } => {
                w.put_u32(*player_id).put_str(player_name);
            }
            Message::ConnectResponse {
                accepted,
                player_id,
                message,
            } => {
                w.put_bool(*accepted).put_u32(*player_id).put_str(message);
            }
            Message::Disconnect | Message::ListCharacters => {}
            Message::LoginRequest { username, password }
            | Message::RegisterRequest { username, password } => {
                w.put_str(username).put_str(password);
            }
            Message::TokenAuth { token } | Message::SessionCheck { token } => {
                w.put_str(token);
            }
            Message::ServiceAuth {
                service_key,
                instance,
            } => {
                w.put_str(service_key).put_str(instance);
            }
            Message::JoinGame {
                character_id,
                token,
            } => {
                w.put_u32(*character_id).put_str(token);
            }
            Message::PlayerInput(input) => {
                w.put_u32(input.player_id)
                    .put_vec3(input.movement)
                    .put_f32(input.yaw)
                    .put_f32(input.pitch)
                    .put_bool(input.jump)
                    .put_bool(input.crouch)
                    .put_u32(input.timestamp);
            }
            Message::PlayerStateUpdate(state) => {
                w.put_u32(state.player_id)
                    .put_vec3(state.position)
                    .put_vec3(state.velocity)
                    .put_f32(state.yaw)
                    .put_f32(state.pitch)
                    .put_f32(state.health)
                    .put_f32(state.resource)
                    .put_u32(state.timestamp);
            }
            Message::PlayerSpawn {
                player_id,
                position,
                player_name,
                class_name,
            } => {
                w.put_u32(*player_id)
                    .put_vec3(*position)
                    .put_str(player_name)
                    .put_str(class_name);
            }
            Message::PlayerDespawn { player_id } => {
                w.put_u32(*player_id);
            }
            Message::Chat { sender, message } => {
                w.put_str(sender).put_str(message);
            }
            Message::QuestList(quests) => {
                w.put_u32(quests.len() as u32);
                for q in quests {
                    w.put_u32(q.id)
                        .put_str(&q.title)
                        .put_str(&q.description)
                        .put_u32(q.required_level)
                        .put_u8(q.status as u8);
                }
            }
            Message::AcceptQuest { quest_id } | Message::AbandonQuest { quest_id } => {
                w.put_u32(*quest_id);
            }
            Message::QuestProgress {
                quest_id,
                target,
                amount,
            } => {
                w.put_u32(*quest_id).put_str(target).put_u32(*amount);
            }
            Message::QuestStatus {
                quest_id,
                status,
                objectives,
            } => {
                w.put_u32(*quest_id)
                    .put_u8(*status as u8)
                    .put_u32(objectives.len() as u32);
                for (current, required) in objectives {
                    w.put_u32(*current).put_u32(*required);
                }
            }
            Message::CreateCharacter { name, class } => {
                w.put_str(name).put_str(class);
            }
            Message::SelectCharacter { character_id }
            | Message::DeleteCharacter { character_id }
            | Message::SaveCharacter { character_id }
            | Message::ReleaseCharacter { character_id } => {
                w.put_u32(*character_id);
            }
            Message::LoadCharacter {
                character_id,
                username,
            } => {
                w.put_u32(*character_id).put_str(username);
            }
            Message::UpdateCharacter(record) | Message::CharacterData(record) => {
                record.write(&mut w);
            }
            Message::CharacterList(entries) => {
                w.put_u32(entries.len() as u32);
                for e in entries {
                    w.put_u32(e.id)
                        .put_str(&e.name)
                        .put_str(&e.class)
                        .put_u32(e.level);
                }
            }
            Message::CharacterResult {
                op,
                success,
                message,
            } => {
                w.put_u8(op.tag()).put_bool(*success).put_str(message);
            }
        }
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let kind = MessageType::try_from(r.u8()?)?;

        let msg = match kind {
            MessageType::ConnectRequest => Message::ConnectRequest {
                player_id: r.u32()?,
                player_name: r.string()?,
            },
            MessageType::ConnectResponse => Message::ConnectResponse {
                accepted: r.bool()?,
                player_id: r.u32()?,
                message: r.string()?,
            },
            MessageType::Disconnect => Message::Disconnect,
            MessageType::LoginRequest => Message::LoginRequest {
                username: r.string()?,
                password: r.string()?,
            },
            MessageType::RegisterRequest => Message::RegisterRequest {
                username: r.string()?,
                password: r.string()?,
            },
            MessageType::TokenAuth => Message::TokenAuth { token: r.string()? },
            MessageType::ServiceAuth => Message::ServiceAuth {
                service_key: r.string()?,
                instance: r.string()?,
            },
            MessageType::JoinGame => Message::JoinGame {
                character_id: r.u32()?,
                token: r.string()?,
            },
            MessageType::SessionCheck => Message::SessionCheck { token: r.string()? },
            MessageType::PlayerInput => Message::PlayerInput(PlayerInput {
                player_id: r.u32()?,
                movement: r.vec3()?,
                yaw: r.f32()?,
                pitch: r.f32()?,
                jump: r.bool()?,
                crouch: r.bool()?,
                timestamp: r.u32()?,
            }),
            MessageType::PlayerStateUpdate => Message::PlayerStateUpdate(PlayerState {
                player_id: r.u32()?,
                position: r.vec3()?,
                velocity: r.vec3()?,
                yaw: r.f32()?,
                pitch: r.f32()?,
                health: r.f32()?,
                resource: r.f32()?,
                timestamp: r.u32()?,
            }),
            MessageType::PlayerSpawn => Message::PlayerSpawn {
                player_id: r.u32()?,
                position: r.vec3()?,
                player_name: r.string()?,
                class_name: r.string()?,
            },
            MessageType::PlayerDespawn => Message::PlayerDespawn {
                player_id: r.u32()?,
            },
            MessageType::Chat => Message::Chat {
                sender: r.string()?,
                message: r.string()?,
            },
            MessageType::QuestList => {
                let count = r.u32()?;
                let mut quests = Vec::new();
                for _ in 0..count {
                    quests.push(QuestSummary {
                        id: r.u32()?,
                        title: r.string()?,
                        description: r.string()?,
                        required_level: r.u32()?,
                        status: QuestStatus::try_from(r.u8()?)?,
                    });
                }
                Message::QuestList(quests)
            }
            MessageType::AcceptQuest => Message::AcceptQuest {
                quest_id: r.u32()?,
            },
            MessageType::QuestProgress => Message::QuestProgress {
                quest_id: r.u32()?,
                target: r.string()?,
                amount: r.u32()?,
            },
            MessageType::QuestStatus => {
                let quest_id = r.u32()?;
                let status = QuestStatus::try_from(r.u8()?)?;
                let count = r.u32()?;
                let mut objectives = Vec::new();
                for _ in 0..count {
                    objectives.push((r.u32()?, r.u32()?));
                }
                Message::QuestStatus {
                    quest_id,
                    status,
                    objectives,
                }
            }
            MessageType::AbandonQuest => Message::AbandonQuest {
                quest_id: r.u32()?,
            },
            MessageType::ListCharacters => Message::ListCharacters,
            MessageType::CreateCharacter => Message::CreateCharacter {
                name: r.string()?,
                class: r.string()?,
            },
            MessageType::SelectCharacter => Message::SelectCharacter {
                character_id: r.u32()?,
            },
            MessageType::DeleteCharacter => Message::DeleteCharacter {
                character_id: r.u32()?,
            },
            MessageType::LoadCharacter => Message::LoadCharacter {
                character_id: r.u32()?,
                username: r.string()?,
            },
            MessageType::SaveCharacter => Message::SaveCharacter {
                character_id: r.u32()?,
            },
            MessageType::UpdateCharacter => {
                Message::UpdateCharacter(CharacterRecord::read(&mut r)?)
            }
            MessageType::ReleaseCharacter => Message::ReleaseCharacter {
                character_id: r.u32()?,
            },
            MessageType::CharacterList => {
                let count = r.u32()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(CharacterSummary {
                        id: r.u32()?,
                        name: r.string()?,
                        class: r.string()?,
                        level: r.u32()?,
                    });
                }
                Message::CharacterList(entries)
            }
            MessageType::CharacterData => Message::CharacterData(CharacterRecord::read(&mut r)?),
            MessageType::CharacterResult => Message::CharacterResult {
                op: MessageType::try_from(r.u8()?)?,
                success: r.bool()?,
                message: r.string()?,
            },
        };

        r.finish()?;
        Ok(msg)
    }
}
