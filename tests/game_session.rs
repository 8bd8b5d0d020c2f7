//! Game service over loopback: joining, state broadcast, graceful leave and
//! the reconnect grace period.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use realm_net::config::RealmConfig;
use realm_net::protocol::message::{Message, MessageType, PlayerInput};
use realm_net::protocol::token::TokenAuthority;
use realm_net::service::game::{GameService, ALREADY_IN_GAME, WELCOME};
use realm_net::service::Client;
use realm_net::transport::{spawn, ServerHandle};
use realm_net::world::{CharacterRegistry, LocalCharacterStore};
use tempfile::TempDir;
use tokio::sync::Mutex;

struct Realm {
    _dir: TempDir,
    config: Arc<RealmConfig>,
    registry: Arc<Mutex<CharacterRegistry>>,
    tokens: TokenAuthority,
    server: ServerHandle,
    hero: u32,
    rogue: u32,
}

async fn start_realm(grace: Duration) -> Realm {
    let dir = TempDir::new().unwrap();
    let mut config = RealmConfig::default();
    config.persistence.data_dir = dir.path().to_path_buf();
    config.game.grace_period = grace;
    config.game.tick_rate = 20;
    let config = Arc::new(config);

    let mut registry = CharacterRegistry::new(5);
    let test = registry.ensure_account("test");
    let admin = registry.ensure_account("admin");
    let hero = registry.create_character(test, "Hero", "Fighter").unwrap().id;
    let rogue = registry.create_character(admin, "Rogue", "Rogue").unwrap().id;
    let registry = Arc::new(Mutex::new(registry));

    let store = LocalCharacterStore::new(registry.clone(), "game@test", dir.path());
    let server = spawn(
        "127.0.0.1:0",
        Arc::new(GameService::new(&config, store)),
        config.clone(),
    )
    .await
    .unwrap();

    Realm {
        tokens: TokenAuthority::new(
            config.security.shared_secret.as_bytes(),
            config.security.token_ttl,
        ),
        _dir: dir,
        config,
        registry,
        server,
        hero,
        rogue,
    }
}

impl Realm {
    async fn join(&self, username: &str, character_id: u32) -> (Client, Message) {
        let mut client = Client::connect(&self.server.local_addr().to_string(), &self.config.security)
            .await
            .unwrap();
        let reply = client
            .request(&Message::JoinGame {
                character_id,
                token: self.tokens.issue(username).unwrap(),
            })
            .await
            .unwrap();
        (client, reply)
    }

    async fn wait_for_release(&self, character_id: u32) -> bool {
        for _ in 0..100 {
            if self.registry.lock().await.holder(character_id).is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#[tokio::test]
async fn test_join_broadcast_and_leave() {
    let realm = start_realm(Duration::from_secs(15)).await;

    let (mut hero, reply) = realm.join("test", realm.hero).await;
    assert_eq!(reply, Message::response(true, realm.hero, WELCOME));
    assert_eq!(
        realm.registry.lock().await.holder(realm.hero),
        Some("game@test")
    );

    let (mut rogue, reply) = realm.join("admin", realm.rogue).await;
    assert!(matches!(reply, Message::ConnectResponse { accepted: true, .. }));

    // Each side learns about the other
    let Message::PlayerSpawn { player_id, player_name, .. } =
        hero.receive_type(MessageType::PlayerSpawn).await.unwrap()
    else {
        unreachable!()
    };
    assert_eq!(player_id, realm.rogue);
    assert_eq!(player_name, "Rogue");
    let Message::PlayerSpawn { player_id, .. } =
        rogue.receive_type(MessageType::PlayerSpawn).await.unwrap()
    else {
        unreachable!()
    };
    assert_eq!(player_id, realm.hero);

    hero.send(&Message::PlayerInput(PlayerInput {
        player_id: realm.hero,
        movement: glam::Vec3::X,
        yaw: 0.0,
        pitch: 0.0,
        jump: false,
        crouch: false,
        timestamp: 1,
    }))
    .await
    .unwrap();

    // Rogue only ever sees Hero's state, never its own
    let mut moved = false;
    for _ in 0..40 {
        let Message::PlayerStateUpdate(state) =
            rogue.receive_type(MessageType::PlayerStateUpdate).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(state.player_id, realm.hero);
        if state.velocity.x > 0.0 {
            moved = true;
            break;
        }
    }
    assert!(moved);

    hero.disconnect().await.unwrap();
    assert_eq!(
        rogue.receive_type(MessageType::PlayerDespawn).await.unwrap(),
        Message::PlayerDespawn {
            player_id: realm.hero
        }
    );
    assert!(realm.wait_for_release(realm.hero).await);
    let saved = realm
        .registry
        .lock()
        .await
        .get_character_state(realm.hero)
        .unwrap();
    assert!(saved.position.x > 0.0);

    rogue.disconnect().await.unwrap();
    realm.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_character_of_another_account_is_refused() {
    let realm = start_realm(Duration::from_secs(15)).await;

    let (_client, reply) = realm.join("admin", realm.hero).await;
    assert!(matches!(reply, Message::ConnectResponse { accepted: false, .. }));
    assert_eq!(realm.registry.lock().await.holder(realm.hero), None);

    realm.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_join_while_playing_is_refused() {
    let realm = start_realm(Duration::from_secs(15)).await;

    let (first, _) = realm.join("test", realm.hero).await;
    let (_second, reply) = realm.join("test", realm.hero).await;
    assert_eq!(reply, Message::response(false, 0, ALREADY_IN_GAME));

    first.disconnect().await.unwrap();
    realm.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropped_connection_rejoins_within_grace() {
    let realm = start_realm(Duration::from_secs(15)).await;

    let (hero, _) = realm.join("test", realm.hero).await;
    drop(hero);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Still checked out: the player is waiting out the grace period
    assert_eq!(
        realm.registry.lock().await.holder(realm.hero),
        Some("game@test")
    );
    let (hero, reply) = realm.join("test", realm.hero).await;
    assert_eq!(reply, Message::response(true, realm.hero, WELCOME));

    hero.disconnect().await.unwrap();
    assert!(realm.wait_for_release(realm.hero).await);
    realm.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_grace_expiry_despawns_and_releases() {
    let realm = start_realm(Duration::from_millis(300)).await;

    let (mut rogue, _) = realm.join("admin", realm.rogue).await;
    let (hero, _) = realm.join("test", realm.hero).await;
    rogue.receive_type(MessageType::PlayerSpawn).await.unwrap();

    drop(hero);
    assert_eq!(
        rogue.receive_type(MessageType::PlayerDespawn).await.unwrap(),
        Message::PlayerDespawn {
            player_id: realm.hero
        }
    );
    assert!(realm.wait_for_release(realm.hero).await);

    rogue.disconnect().await.unwrap();
    realm.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_players() {
    let realm = start_realm(Duration::from_secs(15)).await;
    let (_hero, _) = realm.join("test", realm.hero).await;

    let registry = realm.registry.clone();
    let hero = realm.hero;
    realm.server.shutdown().await.unwrap();
    assert_eq!(registry.lock().await.holder(hero), None);
}
