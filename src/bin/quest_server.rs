//! Quest service: catalog and per-player progress.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use realm_net::cli::{run_service, ServiceArgs};
use realm_net::config::QUEST_PORT;
use realm_net::service::quest::QuestService;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServiceArgs::parse();
    let config = match args.load_config("quest-server") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.ignore_secondary("quest");

    let service = Arc::new(QuestService::new(&config));
    run_service(service, config, args.port(QUEST_PORT)).await
}
