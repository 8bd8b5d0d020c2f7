//! Command line and process lifecycle shared by the service binaries.
//!
//! Every binary takes `<port> [secondary] [config-file]`. Numbers that do not
//! parse fall back to their defaults with a warning; a config file that does
//! not exist means defaults. The process exits 0 after a graceful shutdown on
//! SIGINT/SIGTERM and 1 when it cannot start.

use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{RealmConfig, DEFAULT_CONFIG_FILE};
use crate::error::Result;
use crate::service::Service;
use crate::transport::tcp;
use crate::utils::logging::init_logging;

#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct ServiceArgs {
    /// Port to listen on
    pub port: Option<String>,

    /// Service-specific number: max characters (character), history length
    /// (chat), max players (game); accepted and ignored by login and quest
    pub secondary: Option<String>,

    /// Config file, `key=value` lines or `.toml`
    pub config: Option<PathBuf>,
}

/// Parse `raw`, falling back to `default` with a warning.
pub fn parse_or<T>(raw: Option<&str>, default: T, what: &str) -> T
where
    T: FromStr + Display + PartialEq + Default,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            warn!(value = raw, default = %default, "Invalid {what}, using default");
            default
        }
    }
}

impl ServiceArgs {
    pub fn port(&self, default: u16) -> u16 {
        parse_or(self.port.as_deref(), default, "port")
    }

    pub fn secondary<T>(&self, default: T, what: &str) -> T
    where
        T: FromStr + Display + PartialEq + Default,
    {
        parse_or(self.secondary.as_deref(), default, what)
    }

    /// For services without a secondary setting. Returns whether one was
    /// given, after warning that it is ignored.
    pub fn ignore_secondary(&self, service: &str) -> bool {
        let Some(raw) = self.secondary.as_deref() else {
            return false;
        };
        warn!(service, value = raw, "Service takes no secondary argument, ignoring it");
        true
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load the config file, apply environment overrides, start logging and
    /// validate.
    pub fn load_config(&self, app_name: &str) -> Result<RealmConfig> {
        let path = self.config_path();
        let mut config = RealmConfig::load_or_default(&path)?;
        config.apply_env();
        config.logging.app_name = app_name.to_owned();
        init_logging(&config.logging);

        for problem in config.validate() {
            warn!("{problem}");
        }
        config.validate_strict()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received CTRL+C signal, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Bind `port` and run `service` until a shutdown signal.
pub async fn run_service<S: Service>(service: Arc<S>, config: RealmConfig, port: u16) -> ExitCode {
    let address = config.server.bind_address(port);
    let listener = match tcp::bind(&address).await {
        Ok(listener) => listener,
        Err(_) => return ExitCode::FAILURE,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(tcp::serve(listener, service, Arc::new(config), shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(service = S::NAME, error = %e, "Shutdown finished with errors");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(service = S::NAME, error = %e, "Server task failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(port: Option<&str>, secondary: Option<&str>) -> ServiceArgs {
        ServiceArgs {
            port: port.map(str::to_owned),
            secondary: secondary.map(str::to_owned),
            config: None,
        }
    }

    #[test]
    fn test_numbers_fall_back_to_defaults() {
        assert_eq!(args(Some("3000"), None).port(25564), 3000);
        assert_eq!(args(Some("not-a-port"), None).port(25564), 25564);
        assert_eq!(args(Some("0"), None).port(25564), 25564);
        assert_eq!(args(Some("99999"), None).port(25564), 25564);
        assert_eq!(args(None, None).port(25565), 25565);

        assert_eq!(args(None, Some("8")).secondary(5usize, "max characters"), 8);
        assert_eq!(args(None, Some("-1")).secondary(5usize, "max characters"), 5);
    }

    #[test]
    fn test_positional_parsing() {
        let parsed = ServiceArgs::parse_from(["login-server", "4000", "3", "realm.toml"]);
        assert_eq!(parsed.port(1), 4000);
        assert_eq!(parsed.secondary(5usize, "max characters"), 3);
        assert_eq!(parsed.config_path(), PathBuf::from("realm.toml"));

        let bare = ServiceArgs::parse_from(["quest-server"]);
        assert_eq!(bare.config_path(), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_login_ignores_secondary() {
        let parsed = ServiceArgs::parse_from(["login-server", "4000", "3", "realm.toml"]);
        assert!(parsed.ignore_secondary("login"));
        assert_eq!(parsed.port(1), 4000);
        assert_eq!(parsed.config_path(), PathBuf::from("realm.toml"));
        assert!(!args(Some("4000"), None).ignore_secondary("login"));
    }
}
