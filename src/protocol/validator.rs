//! # Packet Validator
//!
//! The boundary between bytes from the network and fields the services trust.
//! It runs on every decrypted payload before [`Message::decode`] and before
//! any handler reads a field.
//!
//! Checks, in order:
//! 1. empty payload → [`ValidationResult::NullData`]
//! 2. larger than [`MAX_FRAME_SIZE`] → [`ValidationResult::InvalidSize`]
//! 3. tag differs from the expected type → [`ValidationResult::InvalidType`]
//! 4. outside the type's `[min, max]` size → [`ValidationResult::InvalidSize`]
//! 5. any string field longer than [`MAX_STRING_LENGTH`] or running past the
//!    end → [`ValidationResult::InvalidSize`]
//!
//! [`Message::decode`]: crate::protocol::message::Message::decode

use crate::config::{MAX_FRAME_SIZE, MAX_STRING_LENGTH};
use crate::protocol::message::MessageType;

/// Outcome of [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    InvalidSize,
    InvalidType,
    NullData,
}

impl ValidationResult {
    pub fn is_valid(self) -> bool {
        self == ValidationResult::Valid
    }
}

/// Encoded size bounds `[min, max]` for a message type.
pub fn size_bounds(kind: MessageType) -> (usize, usize) {
    use MessageType::*;
    match kind {
        ConnectRequest | ConnectResponse => (10, 1024),
        Disconnect | ListCharacters => (1, 1024),
        LoginRequest | RegisterRequest | ServiceAuth | JoinGame | Chat | CreateCharacter
        | LoadCharacter => (9, 1024),
        TokenAuth | SessionCheck | PlayerDespawn | AcceptQuest | AbandonQuest | SelectCharacter
        | DeleteCharacter | SaveCharacter | ReleaseCharacter => (5, 1024),
        PlayerInput => (31, 100),
        PlayerStateUpdate => (49, 100),
        PlayerSpawn => (25, 512),
        QuestList => (5, 8192),
        QuestProgress => (13, 1024),
        QuestStatus => (10, 1024),
        UpdateCharacter | CharacterData => (1, 4096),
        CharacterList => (5, 4096),
        CharacterResult => (7, 1024),
    }
}

/// Offset of the first string field and the number of consecutive strings.
fn string_layout(kind: MessageType) -> Option<(usize, usize)> {
    use MessageType::*;
    match kind {
        ConnectRequest => Some((5, 1)),
        ConnectResponse => Some((6, 1)),
        LoginRequest | RegisterRequest | ServiceAuth | Chat | CreateCharacter => Some((1, 2)),
        TokenAuth | SessionCheck => Some((1, 1)),
        JoinGame | QuestProgress | LoadCharacter => Some((5, 1)),
        PlayerSpawn => Some((17, 2)),
        CharacterResult => Some((3, 1)),
        _ => None,
    }
}

/// Check `payload` against the rules for `expected`.
pub fn validate(payload: &[u8], expected: MessageType) -> ValidationResult {
    if payload.is_empty() {
        return ValidationResult::NullData;
    }
    if payload.len() > MAX_FRAME_SIZE {
        return ValidationResult::InvalidSize;
    }
    if payload[0] != expected.tag() {
        return ValidationResult::InvalidType;
    }

    let (min, max) = size_bounds(expected);
    if payload.len() < min || payload.len() > max {
        return ValidationResult::InvalidSize;
    }

    if let Some((offset, count)) = string_layout(expected) {
        if !strings_in_bounds(payload, offset, count) {
            return ValidationResult::InvalidSize;
        }
    }

    ValidationResult::Valid
}

/// Walk `count` length-prefixed strings starting at `offset`.
fn strings_in_bounds(payload: &[u8], mut offset: usize, count: usize) -> bool {
    for _ in 0..count {
        let Some(prefix) = payload.get(offset..offset + 4) else {
            return false;
        };
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > MAX_STRING_LENGTH {
            return false;
        }
        offset += 4 + len;
        if offset > payload.len() {
            return false;
        }
    }
    true
}
