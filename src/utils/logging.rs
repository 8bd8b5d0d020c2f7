//! Structured logging setup for the service binaries.
//!
//! Console output via `tracing-subscriber`, filtered by `RUST_LOG` when set and
//! by [`LoggingConfig::log_level`] otherwise. JSON output is available for log
//! shippers.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Default filter directive for a configured level.
pub fn filter_directive(config: &LoggingConfig) -> String {
    format!("{},realm_net={}", config.log_level, config.log_level)
        .to_lowercase()
}

/// Install the global subscriber. Calling it twice is harmless: the second
/// call leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_format {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(app = %config.app_name, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_filter_directive_follows_level() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&config), "debug,realm_net=debug");
    }

    #[test]
    fn test_double_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
