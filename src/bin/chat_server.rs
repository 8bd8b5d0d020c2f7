//! Chat service: one global room with history replay.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use realm_net::cli::{run_service, ServiceArgs};
use realm_net::config::CHAT_PORT;
use realm_net::service::chat::ChatService;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServiceArgs::parse();
    let mut config = match args.load_config("chat-server") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    config.chat.history_len = args.secondary(config.chat.history_len, "history length");

    let service = Arc::new(ChatService::new(&config));
    run_service(service, config, args.port(CHAT_PORT)).await
}
