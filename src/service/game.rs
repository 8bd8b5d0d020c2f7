//! # Game Service
//!
//! Authoritative simulation. Players join with a character id and a session
//! token; the character is checked out of a [`CharacterStore`] for as long
//! as the player is in the world.
//!
//! ## Tick
//! A fixed-rate interval advances every player and sends each connected
//! player the state of every *other* connected player. Sends are
//! `try_send` into per-connection queues: the tick never waits on a socket,
//! and a player whose queue is full or gone enters the grace period.
//!
//! ## Grace period
//! A dropped connection leaves the player in the world, frozen, for
//! `grace_period`. Joining again with the same character in that window
//! picks the player back up. Once the window passes the player is saved,
//! released and despawned. An explicit `Disconnect` does the same at once.
//! Until that save finishes the character cannot join again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RealmConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{CharacterRecord, Message, MessageType, PlayerInput};
use crate::protocol::token::TokenAuthority;
use crate::service::login::LoginLink;
use crate::service::session::{spawn_writer, Outbox, Session, SessionState};
use crate::service::Service;
use crate::utils::metrics::Metrics;
use crate::world::player::ServerPlayer;
use crate::world::registry::RegistryError;
use crate::world::store::CharacterStore;

pub const WELCOME: &str = "Welcome to the realm!";
pub const ALREADY_IN_GAME: &str = "Character is already in game";
pub const SERVER_FULL: &str = "Server is full";
pub const STILL_SAVING: &str = "Character is still being saved, try again";

const IN_GAME: &[MessageType] = &[MessageType::PlayerInput, MessageType::Disconnect];

/// Milliseconds since the epoch, truncated to the wire's `u32`.
fn timestamp_ms() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or_default()
}

/// Every player on this server, keyed by character id.
#[derive(Debug)]
pub struct GameWorld {
    players: HashMap<u32, ServerPlayer>,
    /// Removed players whose save and release have not finished yet.
    retiring: HashSet<u32>,
    grace_period: Duration,
}

impl GameWorld {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            players: HashMap::new(),
            retiring: HashSet::new(),
            grace_period,
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.players.contains_key(&id)
    }

    pub fn player(&self, id: u32) -> Option<&ServerPlayer> {
        self.players.get(&id)
    }

    pub fn is_retiring(&self, id: u32) -> bool {
        self.retiring.contains(&id)
    }

    /// The save and release of a removed player finished.
    pub fn retired(&mut self, id: u32) {
        self.retiring.remove(&id);
    }

    /// Send to every connected player but `except`. Recipients that cannot
    /// take the message enter the grace period.
    fn broadcast(&mut self, except: Option<u32>, msg: &Message, now: Instant) {
        let failed: Vec<u32> = self
            .players
            .values()
            .filter(|p| Some(p.id()) != except && p.is_connected())
            .filter(|p| !p.send(msg.clone()))
            .map(ServerPlayer::id)
            .collect();
        self.start_grace(&failed, now);
    }

    fn start_grace(&mut self, ids: &[u32], now: Instant) {
        for id in ids {
            if let Some(player) = self.players.get_mut(id) {
                if player.is_connected() {
                    warn!(player = id, "Player unreachable, grace period started");
                    player.begin_grace(now);
                }
            }
        }
    }

    /// Greet a newcomer, exchange spawns with everyone present and add it.
    /// A newcomer that cannot take its greeting starts in the grace period.
    pub fn join(&mut self, player: ServerPlayer) {
        let now = Instant::now();
        let id = player.id();
        let mut greeted = player.send(Message::response(true, id, WELCOME));
        for other in self.players.values() {
            greeted &= player.send(other.spawn_message());
        }
        self.broadcast(None, &player.spawn_message(), now);
        info!(player = id, name = player.name(), players = self.players.len() + 1, "Player joined");
        self.players.insert(id, player);
        if !greeted {
            self.start_grace(&[id], now);
        }
    }

    /// Hand a player in its grace period a new connection. Returns `false`
    /// if the player is not waiting to be picked up.
    pub fn rejoin(&mut self, id: u32, outbox: Outbox, connection: u32) -> bool {
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        if !player.in_grace() {
            return false;
        }
        player.reconnect(outbox, connection);
        player.send(Message::response(true, id, WELCOME));
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        for other in self.players.values().filter(|p| p.id() != id) {
            player.send(other.spawn_message());
        }
        info!(player = id, "Player reconnected within grace period");
        true
    }

    /// Input from the connection currently driving `id`; stale connections
    /// are ignored.
    pub fn apply_input(&mut self, id: u32, connection: u32, input: &PlayerInput) {
        if let Some(player) = self.players.get_mut(&id) {
            if player.connection() == connection {
                player.apply_input(input);
            }
        }
    }

    /// Connection `connection` of player `id` dropped.
    pub fn disconnect(&mut self, id: u32, connection: u32, now: Instant) {
        if let Some(player) = self.players.get_mut(&id) {
            if player.connection() == connection && player.is_connected() {
                debug!(player = id, "Connection lost, grace period started");
                player.begin_grace(now);
            }
        }
    }

    /// Remove `id` if `connection` still drives it.
    pub fn leave(&mut self, id: u32, connection: u32) -> Option<ServerPlayer> {
        if self.players.get(&id)?.connection() != connection {
            return None;
        }
        self.remove(id, Instant::now())
    }

    fn remove(&mut self, id: u32, now: Instant) -> Option<ServerPlayer> {
        let player = self.players.remove(&id)?;
        self.retiring.insert(id);
        self.broadcast(None, &Message::PlayerDespawn { player_id: id }, now);
        info!(player = id, players = self.players.len(), "Player left");
        Some(player)
    }

    /// Advance the simulation by `dt` seconds and broadcast. Returns the
    /// players whose grace period ran out; they are no longer in the world.
    pub fn tick(&mut self, dt: f32, now: Instant, timestamp: u32) -> Vec<ServerPlayer> {
        for player in self.players.values_mut() {
            player.update(dt);
        }

        let states: Vec<_> = self
            .players
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.state(timestamp))
            .collect();

        let mut failed = Vec::new();
        for recipient in self.players.values().filter(|p| p.is_connected()) {
            for state in states.iter().filter(|s| s.player_id != recipient.id()) {
                if !recipient.send(Message::PlayerStateUpdate(state.clone())) {
                    failed.push(recipient.id());
                    break;
                }
            }
        }
        self.start_grace(&failed, now);
        self.sweep(now)
    }

    fn sweep(&mut self, now: Instant) -> Vec<ServerPlayer> {
        let expired: Vec<u32> = self
            .players
            .values()
            .filter(|p| p.grace_expired(now, self.grace_period))
            .map(ServerPlayer::id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                info!(player = id, "Grace period expired");
                self.remove(id, now)
            })
            .collect()
    }

    /// Take every player out of the world.
    pub fn drain(&mut self) -> Vec<ServerPlayer> {
        self.retiring.extend(self.players.keys());
        self.players.drain().map(|(_, p)| p).collect()
    }
}

pub struct GameService<S> {
    world: Mutex<GameWorld>,
    store: S,
    tokens: TokenAuthority,
    login: Option<LoginLink>,
    tick_interval: Duration,
    read_timeout: Duration,
    max_players: usize,
    outbound_queue: usize,
    metrics: Arc<Metrics>,
}

impl<S: CharacterStore> GameService<S> {
    pub fn new(config: &RealmConfig, store: S) -> Self {
        Self {
            world: Mutex::new(GameWorld::new(config.game.grace_period)),
            store,
            tokens: TokenAuthority::new(
                config.security.shared_secret.as_bytes(),
                config.security.token_ttl,
            ),
            login: None,
            tick_interval: config.game.tick_interval(),
            read_timeout: config.game.read_timeout,
            max_players: config.game.max_players,
            // Room for the greeting and a spawn of every other player
            outbound_queue: config
                .server
                .outbound_queue
                .max(config.game.max_players + 2),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Check join tokens against a Login service's session table.
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

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn player_count(&self) -> usize {
        self.world.lock().await.len()
    }

    /// Put the character into the world, or say why not.
    async fn admit(
        &self,
        id: u32,
        username: &str,
        outbox: &Outbox,
        connection: u32,
    ) -> std::result::Result<(), String> {
        {
            let mut world = self.world.lock().await;
            if world.is_retiring(id) {
                return Err(STILL_SAVING.into());
            }
            match world.player(id).map(|p| (p.username() == username, p.in_grace())) {
                Some((false, _)) => return Err(RegistryError::NotOwner.to_string()),
                Some((true, false)) => return Err(ALREADY_IN_GAME.into()),
                Some((true, true)) => {
                    return if world.rejoin(id, outbox.clone(), connection) {
                        Ok(())
                    } else {
                        Err(ALREADY_IN_GAME.into())
                    };
                }
                None if world.len() >= self.max_players => return Err(SERVER_FULL.into()),
                None => {}
            }
        }

        let record = self
            .store
            .checkout(id, username)
            .await
            .map_err(|e| e.to_string())?;

        let mut world = self.world.lock().await;
        if world.contains(id) {
            return Err(ALREADY_IN_GAME.into());
        }
        world.join(ServerPlayer::new(record, username, outbox.clone(), connection));
        Ok(())
    }

    /// Write a departing player back and give up the character.
    async fn retire(&self, record: CharacterRecord) {
        let id = record.id;
        let result = async {
            self.store.update(&record).await?;
            self.store.save(id).await?;
            self.store.release(id).await
        }
        .await;
        match result {
            Ok(()) => debug!(player = id, "Player saved and released"),
            Err(e) => error!(player = id, error = %e, "Failed to save player"),
        }
        self.world.lock().await.retired(id);
    }
}

impl<S: CharacterStore> Service for GameService<S> {
    const NAME: &'static str = "game";

    #[instrument(skip_all, fields(session = session.id, peer = %session.peer))]
    async fn handle(self: Arc<Self>, mut session: Session) -> Result<()> {
        session.state = SessionState::AwaitingToken;
        let Message::JoinGame {
            character_id,
            token,
        } = session.recv_expecting(&[MessageType::JoinGame]).await?
        else {
            return Err(ProtocolError::UnexpectedMessage);
        };
        let username = match self.authorize(&token).await {
            Ok(username) => username,
            Err(e) => {
                self.metrics.auth_failure();
                return Err(e);
            }
        };

        let Session {
            id: connection,
            mut reader,
            writer,
            ..
        } = session;
        let (outbox, queue) = mpsc::channel(self.outbound_queue);
        let writer = spawn_writer(writer, queue);

        if let Err(reason) = self.admit(character_id, &username, &outbox, connection).await {
            info!(character_id, username = %username, reason = %reason, "Join refused");
            // The queue is fresh, so this cannot be full
            let _ = outbox.try_send(Message::response(false, 0, reason));
            drop(outbox);
            return match writer.await {
                Ok(result) => result,
                Err(e) => Err(ProtocolError::Custom(format!("Writer task failed: {e}"))),
            };
        }
        self.metrics.session_authenticated();
        drop(outbox);

        let outcome = loop {
            match reader.recv_expecting(IN_GAME).await {
                Ok(Message::PlayerInput(input)) => {
                    self.world
                        .lock()
                        .await
                        .apply_input(character_id, connection, &input);
                }
                Ok(Message::Disconnect) => break Ok(()),
                Ok(_) => break Err(ProtocolError::UnexpectedMessage),
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(()) => {
                let left = self.world.lock().await.leave(character_id, connection);
                if let Some(player) = left {
                    self.retire(player.to_record()).await;
                }
                Ok(())
            }
            Err(e) => {
                self.world
                    .lock()
                    .await
                    .disconnect(character_id, connection, Instant::now());
                Err(e)
            }
        }
    }

    fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn read_timeout(&self) -> Option<Duration> {
        Some(self.read_timeout)
    }

    fn spawn_background(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let service = self;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        let dt = now.duration_since(last).as_secs_f32();
                        last = now;
                        let expired = service.world.lock().await.tick(dt, now, timestamp_ms());
                        for player in expired {
                            let service = service.clone();
                            tokio::spawn(async move { service.retire(player.to_record()).await });
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        vec![ticker]
    }

    async fn on_shutdown(&self) -> Result<()> {
        let players = self.world.lock().await.drain();
        info!(players = players.len(), "Saving players");
        for player in players {
            self.retire(player.to_record()).await;
        }
        self.store.close().await;
        if let Some(login) = &self.login {
            login.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::world::registry::new_character;
    use crate::world::{CharacterRegistry, LocalCharacterStore};
    use glam::Vec3;

    fn add(world: &mut GameWorld, id: u32, depth: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(depth);
        world.join(ServerPlayer::new(
            new_character(id, &format!("P{id}"), "Fighter"),
            format!("user{id}"),
            tx,
            id,
        ));
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_join_exchanges_spawns() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let mut a = add(&mut world, 1, 16);
        let mut b = add(&mut world, 2, 16);

        let to_a = drain(&mut a);
        assert!(matches!(to_a[0], Message::ConnectResponse { accepted: true, player_id: 1, .. }));
        assert!(matches!(to_a[1], Message::PlayerSpawn { player_id: 2, .. }));

        let to_b = drain(&mut b);
        assert!(matches!(to_b[0], Message::ConnectResponse { accepted: true, player_id: 2, .. }));
        assert!(matches!(to_b[1], Message::PlayerSpawn { player_id: 1, .. }));
        assert_eq!(to_b.len(), 2);
    }

    #[tokio::test]
    async fn test_tick_sends_each_player_only_the_others() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let mut a = add(&mut world, 1, 16);
        let mut b = add(&mut world, 2, 16);
        drain(&mut a);
        drain(&mut b);

        let expired = world.tick(1.0 / 60.0, Instant::now(), 42);
        assert!(expired.is_empty());

        let to_a = drain(&mut a);
        let to_b = drain(&mut b);
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_b.len(), 1);
        assert!(matches!(&to_a[0], Message::PlayerStateUpdate(s) if s.player_id == 2 && s.timestamp == 42));
        assert!(matches!(&to_b[0], Message::PlayerStateUpdate(s) if s.player_id == 1));
    }

    #[tokio::test]
    async fn test_full_queue_starts_grace() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let _a = add(&mut world, 1, 1);
        let mut b = add(&mut world, 2, 16);
        drain(&mut b);

        // a's queue still holds its welcome
        world.tick(0.0, Instant::now(), 0);
        assert!(world.player(1).unwrap().in_grace());
        assert!(!world.player(2).unwrap().in_grace());

        world.tick(0.0, Instant::now(), 0);
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_input_from_stale_connection_ignored() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let _a = add(&mut world, 1, 16);
        let input = PlayerInput {
            player_id: 1,
            movement: Vec3::X,
            yaw: 0.0,
            pitch: 0.0,
            jump: false,
            crouch: false,
            timestamp: 0,
        };
        world.apply_input(1, 99, &input);
        assert_eq!(world.player(1).unwrap().velocity(), Vec3::ZERO);
        world.apply_input(1, 1, &input);
        assert_ne!(world.player(1).unwrap().velocity(), Vec3::ZERO);

        world.disconnect(1, 99, Instant::now());
        assert!(!world.player(1).unwrap().in_grace());
        assert!(world.leave(1, 99).is_none());
        assert!(world.leave(1, 1).is_some());
        assert!(world.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_state() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let _a = add(&mut world, 1, 16);
        let mut b = add(&mut world, 2, 16);
        world.apply_input(1, 1, &PlayerInput {
            player_id: 1,
            movement: Vec3::Z,
            yaw: 0.0,
            pitch: 0.0,
            jump: false,
            crouch: false,
            timestamp: 0,
        });
        world.tick(1.0, Instant::now(), 0);
        let moved = world.player(1).unwrap().position();

        world.disconnect(1, 1, Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(world.tick(1.0, Instant::now(), 0).is_empty());
        assert_eq!(world.player(1).unwrap().position(), moved);

        let (tx, mut rx) = mpsc::channel(16);
        assert!(world.rejoin(1, tx, 5));
        let greeting = drain(&mut rx);
        assert!(matches!(greeting[0], Message::ConnectResponse { accepted: true, .. }));
        assert!(matches!(greeting[1], Message::PlayerSpawn { player_id: 2, .. }));
        assert!(!drain(&mut b).iter().any(|m| matches!(m, Message::PlayerDespawn { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_removes_player() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let _a = add(&mut world, 1, 16);
        let mut b = add(&mut world, 2, 16);
        drain(&mut b);

        world.disconnect(1, 1, Instant::now());
        tokio::time::advance(Duration::from_secs(20)).await;
        let expired = world.tick(0.0, Instant::now(), 0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), 1);
        assert!(!world.contains(1));
        assert!(drain(&mut b).contains(&Message::PlayerDespawn { player_id: 1 }));

        let (tx, _rx) = mpsc::channel(16);
        assert!(!world.rejoin(1, tx, 6));
    }

    #[tokio::test]
    async fn test_newcomer_with_short_queue_starts_grace() {
        let mut world = GameWorld::new(Duration::from_secs(15));
        let _a = add(&mut world, 1, 16);
        let _b = add(&mut world, 2, 16);

        // Welcome plus two spawns do not fit
        let _c = add(&mut world, 3, 2);
        assert!(world.player(3).unwrap().in_grace());
        assert!(!world.player(1).unwrap().in_grace());
    }

    type Fixture = (
        GameService<LocalCharacterStore>,
        Arc<Mutex<CharacterRegistry>>,
        u32,
        tempfile::TempDir,
    );

    async fn service_with_character() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = CharacterRegistry::new(5);
        let account = registry.ensure_account("alice");
        let id = registry.create_character(account, "Hero", "Fighter").unwrap().id;
        let registry = Arc::new(Mutex::new(registry));

        let mut config = RealmConfig::default();
        config.game.grace_period = Duration::from_secs(15);
        config.game.read_timeout = Duration::from_secs(30);
        config.game.max_players = 10;
        config.server.outbound_queue = 4;
        let store = LocalCharacterStore::new(registry.clone(), "game-1", dir.path());
        (GameService::new(&config, store), registry, id, dir)
    }

    #[tokio::test]
    async fn test_settings_come_from_game_config() {
        let (service, _registry, _id, _dir) = service_with_character().await;
        assert_eq!(service.read_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(service.outbound_queue, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_player_cannot_rejoin_until_saved() {
        let (service, registry, id, _dir) = service_with_character().await;
        let (first, _first_rx) = mpsc::channel(16);
        service.admit(id, "alice", &first, 1).await.unwrap();

        service.world.lock().await.disconnect(id, 1, Instant::now());
        tokio::time::advance(Duration::from_secs(16)).await;
        let expired = service.world.lock().await.tick(0.0, Instant::now(), 0);
        assert_eq!(expired.len(), 1);

        // The save of the expired player has not run yet
        let (second, _second_rx) = mpsc::channel(16);
        assert_eq!(
            service.admit(id, "alice", &second, 2).await,
            Err(STILL_SAVING.to_string())
        );
        assert_eq!(registry.lock().await.holder(id), Some("game-1"));

        service.retire(expired[0].to_record()).await;
        assert_eq!(registry.lock().await.holder(id), None);

        service.admit(id, "alice", &second, 2).await.unwrap();
        assert!(service.world.lock().await.contains(id));
        assert_eq!(registry.lock().await.holder(id), Some("game-1"));
    }

    #[tokio::test]
    async fn test_leave_then_rejoin_keeps_checkout() {
        let (service, registry, id, _dir) = service_with_character().await;
        let (first, _first_rx) = mpsc::channel(16);
        service.admit(id, "alice", &first, 1).await.unwrap();

        let left = service.world.lock().await.leave(id, 1).unwrap();
        let (second, _second_rx) = mpsc::channel(16);
        assert!(service.admit(id, "alice", &second, 2).await.is_err());

        service.retire(left.to_record()).await;
        service.admit(id, "alice", &second, 2).await.unwrap();
        assert_eq!(registry.lock().await.holder(id), Some("game-1"));
    }
}
