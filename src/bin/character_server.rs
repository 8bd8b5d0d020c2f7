//! Character service: account rosters and character hand-off.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use realm_net::cli::{run_service, ServiceArgs};
use realm_net::config::CHARACTER_PORT;
use realm_net::service::character::CharacterService;
use realm_net::service::login::LoginLink;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServiceArgs::parse();
    let mut config = match args.load_config("character-server") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.accounts.max_characters = args.secondary(config.accounts.max_characters, "max characters");
    let port = args.port(CHARACTER_PORT);

    let login_address = config.peers.login.address();
    let instance = format!("character@{}", config.server.bind_address(port));
    info!(login = %login_address, instance = %instance, "Checking sessions with login server");
    let login = LoginLink::new(login_address, config.security.clone(), instance);

    let service = match CharacterService::load(&config).await {
        Ok(service) => Arc::new(service.with_login(login)),
        Err(e) => {
            error!(error = %e, "Failed to load character registry");
            return ExitCode::FAILURE;
        }
    };
    run_service(service, config, port).await
}
