//! Login service: credentials in, session tokens out.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use realm_net::cli::{run_service, ServiceArgs};
use realm_net::config::LOGIN_PORT;
use realm_net::service::login::LoginService;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServiceArgs::parse();
    let config = match args.load_config("login-server") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.ignore_secondary("login");

    let service = match LoginService::new(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Failed to start login service");
            return ExitCode::FAILURE;
        }
    };
    run_service(service, config, args.port(LOGIN_PORT)).await
}
