//! Authoritative server-side player.

use std::time::Duration;

use glam::Vec3;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::protocol::message::{CharacterRecord, Message, PlayerInput, PlayerState};
use crate::service::session::Outbox;

/// Ground speed in blocks per second for a full-length movement input.
pub const WALK_SPEED: f32 = 4.3;

/// A character in play on a game server, plus the connection it is played
/// from. The player id is the character id.
#[derive(Debug)]
pub struct ServerPlayer {
    record: CharacterRecord,
    username: String,
    velocity: Vec3,
    outbox: Option<Outbox>,
    /// Session id of the connection currently driving this player.
    connection: u32,
    grace_started: Option<Instant>,
}

impl ServerPlayer {
    pub fn new(record: CharacterRecord, username: impl Into<String>, outbox: Outbox, connection: u32) -> Self {
        Self {
            record,
            username: username.into(),
            velocity: Vec3::ZERO,
            outbox: Some(outbox),
            connection,
            grace_started: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn position(&self) -> Vec3 {
        self.record.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn health(&self) -> f32 {
        self.record.health
    }

    pub fn connection(&self) -> u32 {
        self.connection
    }

    pub fn is_alive(&self) -> bool {
        self.record.health > 0.0
    }

    /// Connected and not waiting out a grace period.
    pub fn is_connected(&self) -> bool {
        self.outbox.is_some()
    }

    /// Steer from client input. Ignored while dead or disconnected.
    pub fn apply_input(&mut self, input: &PlayerInput) {
        if !self.is_alive() || !self.is_connected() {
            return;
        }
        let movement = if input.movement.length_squared() > 1.0 {
            input.movement.normalize()
        } else {
            input.movement
        };
        self.velocity = movement * WALK_SPEED;
        self.record.yaw = input.yaw;
        self.record.pitch = input.pitch;
    }

    /// Advance by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        if !self.is_alive() {
            return;
        }
        self.record.position += self.velocity * dt;
    }

    /// Subtract health; reaching zero kills the player and stops it moving.
    pub fn apply_damage(&mut self, amount: f32) {
        self.record.health = (self.record.health - amount).clamp(0.0, self.record.max_health);
        if !self.is_alive() {
            self.velocity = Vec3::ZERO;
            debug!(player = self.id(), "Player died");
        }
    }

    pub fn state(&self, timestamp: u32) -> PlayerState {
        PlayerState {
            player_id: self.record.id,
            position: self.record.position,
            velocity: self.velocity,
            yaw: self.record.yaw,
            pitch: self.record.pitch,
            health: self.record.health,
            resource: self.record.resource,
            timestamp,
        }
    }

    pub fn spawn_message(&self) -> Message {
        Message::PlayerSpawn {
            player_id: self.record.id,
            position: self.record.position,
            player_name: self.record.name.clone(),
            class_name: self.record.class.clone(),
        }
    }

    /// Queue a message without waiting. Returns `false` when the queue is
    /// full or the writer is gone; the caller should start the grace period.
    pub fn send(&self, msg: Message) -> bool {
        let Some(outbox) = &self.outbox else {
            return false;
        };
        match outbox.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(player = self.id(), "Outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Drop the connection and start counting down from `now`.
    pub fn begin_grace(&mut self, now: Instant) {
        if self.grace_started.is_some() {
            return;
        }
        self.outbox = None;
        self.velocity = Vec3::ZERO;
        self.grace_started = Some(now);
    }

    pub fn in_grace(&self) -> bool {
        self.grace_started.is_some()
    }

    pub fn grace_expired(&self, now: Instant, period: Duration) -> bool {
        self.grace_started
            .is_some_and(|started| now.duration_since(started) >= period)
    }

    /// Time left before removal, zero when not in grace.
    pub fn grace_remaining(&self, now: Instant, period: Duration) -> Duration {
        self.grace_started
            .map_or(Duration::ZERO, |started| period.saturating_sub(now.duration_since(started)))
    }

    /// Attach a new connection, cancelling any grace period.
    pub fn reconnect(&mut self, outbox: Outbox, connection: u32) {
        self.outbox = Some(outbox);
        self.connection = connection;
        self.grace_started = None;
    }

    /// Current state as a record for the character store.
    pub fn to_record(&self) -> CharacterRecord {
        CharacterRecord {
            online: self.is_connected(),
            ..self.record.clone()
        }
    }
}
