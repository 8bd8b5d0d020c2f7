//! Game service: the authoritative world, backed by a Character service.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use realm_net::cli::{run_service, ServiceArgs};
use realm_net::config::GAME_PORT;
use realm_net::service::game::GameService;
use realm_net::service::login::LoginLink;
use realm_net::world::store::RemoteCharacterStore;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServiceArgs::parse();
    let mut config = match args.load_config("game-server") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.game.max_players = args.secondary(config.game.max_players, "max players");
    let port = args.port(GAME_PORT);

    let character = config.peers.character.address();
    let instance = format!("game@{}", config.server.bind_address(port));
    info!(character = %character, instance = %instance, "Using remote character store");
    let store = RemoteCharacterStore::new(character, config.security.clone(), instance.clone());
    let login = LoginLink::new(config.peers.login.address(), config.security.clone(), instance);

    let service = Arc::new(GameService::new(&config, store).with_login(login));
    run_service(service, config, port).await
}
