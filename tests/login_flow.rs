//! Login → Character flow over real loopback sockets, including the
//! service links a game server uses to check characters out and a server
//! uses to ask Login whether a token is still logged in.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use realm_net::config::RealmConfig;
use realm_net::protocol::message::{Message, MessageType};
use realm_net::protocol::token::MIN_TOKEN_LEN;
use realm_net::service::character::CharacterService;
use realm_net::service::login::{LoginLink, LoginService, INVALID_CREDENTIALS};
use realm_net::service::Client;
use realm_net::transport::spawn;
use realm_net::utils::crypto::CipherKind;
use realm_net::utils::password::PasswordHasher;
use realm_net::world::{CharacterRegistry, CharacterStore, RemoteCharacterStore, StoreError};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Arc<RealmConfig> {
    let mut config = RealmConfig::default();
    config.persistence.data_dir = dir.path().to_path_buf();
    Arc::new(config)
}

async fn open_roster(addr: &str, config: &RealmConfig, token: &str) -> Client {
    let mut client = Client::connect(addr, &config.security).await.unwrap();
    let reply = client
        .request(&Message::TokenAuth {
            token: token.to_owned(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Message::ConnectResponse { accepted: true, .. }));
    client
}

#[tokio::test]
async fn test_login_then_create_character() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let login = spawn(
        "127.0.0.1:0",
        Arc::new(LoginService::new(&config).unwrap()),
        config.clone(),
    )
    .await
    .unwrap();
    let character = spawn(
        "127.0.0.1:0",
        Arc::new(CharacterService::new(&config, CharacterRegistry::new(5))),
        config.clone(),
    )
    .await
    .unwrap();

    let mut client = Client::connect(&login.local_addr().to_string(), &config.security)
        .await
        .unwrap();
    let token = client.login("test", "test123").await.unwrap();
    assert!(token.len() >= MIN_TOKEN_LEN);
    assert!(token.len() >= 32);

    let roster_addr = character.local_addr().to_string();
    let mut roster = open_roster(&roster_addr, &config, &token).await;
    assert_eq!(roster.receive().await.unwrap(), Message::CharacterList(Vec::new()));

    let created = roster
        .request(&Message::CreateCharacter {
            name: "Hero".into(),
            class: "Fighter".into(),
        })
        .await
        .unwrap();
    assert!(matches!(
        created,
        Message::CharacterResult { op: MessageType::CreateCharacter, success: true, .. }
    ));
    let Message::CharacterList(list) = roster.receive().await.unwrap() else {
        panic!("expected the refreshed roster");
    };
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "Hero");
    assert_eq!(list[0].class, "Fighter");
    assert_eq!(list[0].level, 1);

    let Message::CharacterData(record) = roster
        .request(&Message::SelectCharacter {
            character_id: list[0].id,
        })
        .await
        .unwrap()
    else {
        panic!("expected character data");
    };
    assert_eq!(record.name, "Hero");
    roster.disconnect().await.unwrap();

    // The save written after creation is on disk
    assert!(dir.path().join("accounts.bin").exists());

    client.disconnect().await.unwrap();
    character.shutdown().await.unwrap();
    login.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_password_keeps_connection_open() {
    let config = Arc::new(RealmConfig::default());
    let login = spawn(
        "127.0.0.1:0",
        Arc::new(LoginService::new(&config).unwrap()),
        config.clone(),
    )
    .await
    .unwrap();

    let mut client = Client::connect(&login.local_addr().to_string(), &config.security)
        .await
        .unwrap();
    client.await_challenge().await.unwrap();
    let reply = client
        .request(&Message::LoginRequest {
            username: "test".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap();
    assert_eq!(reply, Message::response(false, 0, INVALID_CREDENTIALS));

    let reply = client
        .request(&Message::LoginRequest {
            username: "test".into(),
            password: "test123".into(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Message::ConnectResponse { accepted: true, .. }));

    client.disconnect().await.unwrap();
    login.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_names_are_unique_across_accounts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = Arc::new(CharacterService::new(&config, CharacterRegistry::new(5)));
    let server = spawn("127.0.0.1:0", service, config.clone()).await.unwrap();
    let addr = server.local_addr().to_string();

    let tokens = realm_net::protocol::token::TokenAuthority::new(
        config.security.shared_secret.as_bytes(),
        config.security.token_ttl,
    );

    let mut first = open_roster(&addr, &config, &tokens.issue("test").unwrap()).await;
    first.receive_type(MessageType::CharacterList).await.unwrap();
    first
        .request(&Message::CreateCharacter {
            name: "Hero".into(),
            class: "Fighter".into(),
        })
        .await
        .unwrap();

    let mut second = open_roster(&addr, &config, &tokens.issue("admin").unwrap()).await;
    second.receive_type(MessageType::CharacterList).await.unwrap();
    let reply = second
        .request(&Message::CreateCharacter {
            name: "hero".into(),
            class: "Mage".into(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, Message::CharacterResult { success: false, .. }));

    first.disconnect().await.unwrap();
    second.disconnect().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forged_token_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let server = spawn(
        "127.0.0.1:0",
        Arc::new(CharacterService::new(&config, CharacterRegistry::new(5))),
        config.clone(),
    )
    .await
    .unwrap();

    let mut client = Client::connect(&server.local_addr().to_string(), &config.security)
        .await
        .unwrap();
    client
        .send(&Message::TokenAuth {
            token: "0".repeat(MIN_TOKEN_LEN),
        })
        .await
        .unwrap();
    assert!(client.receive().await.is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_store_checkout_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let mut registry = CharacterRegistry::new(5);
    let account = registry.ensure_account("test");
    let hero = registry.create_character(account, "Hero", "Fighter").unwrap();
    let service = Arc::new(CharacterService::new(&config, registry));
    let shared = service.registry();
    let server = spawn("127.0.0.1:0", service, config.clone()).await.unwrap();
    let addr = server.local_addr().to_string();

    let east = RemoteCharacterStore::new(addr.clone(), config.security.clone(), "game@east");
    let west = RemoteCharacterStore::new(addr.clone(), config.security.clone(), "game@west");

    let record = east.checkout(hero.id, "test").await.unwrap();
    assert_eq!(record.name, "Hero");
    assert_eq!(shared.lock().await.holder(hero.id), Some("game@east"));

    assert!(matches!(
        west.checkout(hero.id, "test").await,
        Err(StoreError::Rejected(_))
    ));
    assert!(matches!(
        east.checkout(hero.id, "admin").await,
        Err(StoreError::Rejected(_))
    ));
    // Only the holder may push state
    assert!(west.update(&record).await.is_err());

    let mut moved = record.clone();
    moved.position.x = 12.5;
    east.update(&moved).await.unwrap();
    east.save(hero.id).await.unwrap();
    east.release(hero.id).await.unwrap();
    assert_eq!(shared.lock().await.holder(hero.id), None);
    assert_eq!(
        shared.lock().await.get_character_state(hero.id).unwrap().position.x,
        12.5
    );

    // Closing the link releases everything the instance still holds
    west.checkout(hero.id, "test").await.unwrap();
    west.close().await;
    let mut released = false;
    for _ in 0..50 {
        if shared.lock().await.holder(hero.id).is_none() {
            released = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(released);

    east.close().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_service_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let server = spawn(
        "127.0.0.1:0",
        Arc::new(CharacterService::new(&config, CharacterRegistry::new(5))),
        config.clone(),
    )
    .await
    .unwrap();

    let mut security = config.security.clone();
    security.service_key = "not-the-key".into();
    let store = RemoteCharacterStore::new(server.local_addr().to_string(), security, "game@rogue");
    assert!(store.checkout(1, "test").await.is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_logged_out_token_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let login_service =
        Arc::new(LoginService::with_hasher(&config, PasswordHasher::new(10)).unwrap());
    let login = spawn("127.0.0.1:0", login_service.clone(), config.clone())
        .await
        .unwrap();
    let login_addr = login.local_addr().to_string();
    let link = LoginLink::new(login_addr.clone(), config.security.clone(), "character@test");
    let character = spawn(
        "127.0.0.1:0",
        Arc::new(CharacterService::new(&config, CharacterRegistry::new(5)).with_login(link)),
        config.clone(),
    )
    .await
    .unwrap();
    let roster_addr = character.local_addr().to_string();

    let mut client = Client::connect(&login_addr, &config.security).await.unwrap();
    let token = client.login("test", "test123").await.unwrap();

    // Logged in: Login vouches for the token
    let mut roster = open_roster(&roster_addr, &config, &token).await;
    roster.receive_type(MessageType::CharacterList).await.unwrap();
    roster.disconnect().await.unwrap();

    client.disconnect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while login_service.session_user(&token).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("logout should revoke the token");

    // Same token, still signed and unexpired, after logout
    let mut stale = Client::connect(&roster_addr, &config.security).await.unwrap();
    stale
        .send(&Message::TokenAuth {
            token: token.clone(),
        })
        .await
        .unwrap();
    assert!(stale.receive().await.is_err());

    character.shutdown().await.unwrap();
    login.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_login_link_answers_session_checks() {
    let config = Arc::new(RealmConfig::default());
    let login = spawn(
        "127.0.0.1:0",
        Arc::new(LoginService::with_hasher(&config, PasswordHasher::new(10)).unwrap()),
        config.clone(),
    )
    .await
    .unwrap();
    let login_addr = login.local_addr().to_string();

    let mut client = Client::connect(&login_addr, &config.security).await.unwrap();
    let token = client.login("admin", "admin123").await.unwrap();

    let link = LoginLink::new(login_addr.clone(), config.security.clone(), "game@test");
    assert_eq!(link.session_user(&token).await.unwrap().as_deref(), Some("admin"));
    assert!(link.confirm(&token, "admin").await.is_ok());
    assert!(link.confirm(&token, "test").await.is_err());
    assert_eq!(link.session_user("00ff").await.unwrap(), None);
    link.close().await;

    let mut security = config.security.clone();
    security.service_key = "not-the-key".into();
    let rogue = LoginLink::new(login_addr, security, "game@rogue");
    assert!(rogue.session_user(&token).await.is_err());

    client.disconnect().await.unwrap();
    login.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_keystream_cipher_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut config = RealmConfig::default();
    config.persistence.data_dir = dir.path().to_path_buf();
    config.security.cipher = CipherKind::Keystream;
    let config = Arc::new(config);

    let login = spawn(
        "127.0.0.1:0",
        Arc::new(LoginService::with_hasher(&config, PasswordHasher::new(10)).unwrap()),
        config.clone(),
    )
    .await
    .unwrap();
    let login_addr = login.local_addr().to_string();
    let link = LoginLink::new(login_addr.clone(), config.security.clone(), "character@test");
    let character = spawn(
        "127.0.0.1:0",
        Arc::new(CharacterService::new(&config, CharacterRegistry::new(5)).with_login(link)),
        config.clone(),
    )
    .await
    .unwrap();

    let mut client = Client::connect(&login_addr, &config.security).await.unwrap();
    let token = client.login("player1", "password1").await.unwrap();

    let mut roster = open_roster(&character.local_addr().to_string(), &config, &token).await;
    assert_eq!(roster.receive().await.unwrap(), Message::CharacterList(Vec::new()));
    for name in ["Keyed", "Streamed"] {
        let reply = roster
            .request(&Message::CreateCharacter {
                name: name.into(),
                class: "Ranger".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, Message::CharacterResult { success: true, .. }));
        roster.receive_type(MessageType::CharacterList).await.unwrap();
    }
    let Message::CharacterList(list) = roster.request(&Message::ListCharacters).await.unwrap()
    else {
        panic!("expected the roster");
    };
    assert_eq!(list.len(), 2);

    // A client on the other cipher cannot talk to the keystream server
    let mut mismatched = config.security.clone();
    mismatched.cipher = CipherKind::Aead;
    let mut wrong = Client::connect(&login_addr, &mismatched).await.unwrap();
    assert!(wrong.await_challenge().await.is_err());

    roster.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    character.shutdown().await.unwrap();
    login.shutdown().await.unwrap();
}
