//! # Configuration Management
//!
//! Centralized configuration for every service binary.
//!
//! The primary source is the `key=value` peer file shared by all services
//! (`server_config.txt` by default): one pair per line, `#` starts a comment.
//! It tells each service where its peers live and carries the few tuning knobs
//! operators change. Unknown keys and unparsable values are logged and
//! skipped, so a typo never stops a server from starting.
//!
//! ## Configuration Sources
//! - `key=value` files via [`RealmConfig::from_file`] / [`RealmConfig::from_kv_str`]
//! - TOML files (any path ending in `.toml`) via [`RealmConfig::from_toml`]
//! - Environment overrides via [`RealmConfig::apply_env`]
//! - Direct instantiation with defaults
//!
//! ## Security Considerations
//! - The default shared secret and service key are for local development only;
//!   [`RealmConfig::validate`] flags them
//! - Read timeouts bound how long a silent peer can hold a connection task

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{warn, Level};

use crate::error::{ProtocolError, Result};
use crate::utils::crypto::CipherKind;
use crate::utils::timeout;

/// Absolute ceiling on a frame payload (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Longest string field the validator accepts.
pub const MAX_STRING_LENGTH: usize = 512;

/// Default listening ports.
pub const LOGIN_PORT: u16 = 25564;
pub const GAME_PORT: u16 = 25565;
pub const CHAT_PORT: u16 = 25566;
pub const QUEST_PORT: u16 = 25567;
pub const CHARACTER_PORT: u16 = 25568;
/// Reserved for the auction house.
pub const AUCTION_PORT: u16 = 25569;

/// Peer file read when none is named on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "server_config.txt";

/// Development-only secrets.
pub const DEFAULT_SHARED_SECRET: &str = "RealmSharedSecret-dev";
pub const DEFAULT_SERVICE_KEY: &str = "RealmServiceKey-dev";

/// Top-level configuration shared by all services.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RealmConfig {
    #[serde(default)]
    pub peers: PeerConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub game: GameConfig,

    #[serde(default)]
    pub accounts: AccountConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RealmConfig {
    /// Load from a `key=value` file, or a TOML file when the path ends in `.toml`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml(&contents)
        } else {
            Ok(Self::from_kv_str(&contents))
        }
    }

    /// Like [`from_file`](Self::from_file), but a missing file means defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Parse the `key=value` format. Never fails: bad lines are warned about.
    pub fn from_kv_str(content: &str) -> Self {
        let mut config = Self::default();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = lineno + 1, "Ignoring config line without '='");
                continue;
            };
            config.set(key.trim(), value.trim());
        }
        config
    }

    /// Apply a single `key=value` pair.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "login_server_host" => self.peers.login.host = value.to_string(),
            "login_server_port" => parse_into(key, value, &mut self.peers.login.port),
            "character_server_host" => self.peers.character.host = value.to_string(),
            "character_server_port" => parse_into(key, value, &mut self.peers.character.port),
            "game_server_host" => self.peers.game.host = value.to_string(),
            "game_server_port" => parse_into(key, value, &mut self.peers.game.port),
            "chat_server_host" => self.peers.chat.host = value.to_string(),
            "chat_server_port" => parse_into(key, value, &mut self.peers.chat.port),
            "quest_server_host" => self.peers.quest.host = value.to_string(),
            "quest_server_port" => parse_into(key, value, &mut self.peers.quest.port),
            "shared_secret" => self.security.shared_secret = value.to_string(),
            "service_key" => self.security.service_key = value.to_string(),
            "cipher" => parse_into(key, value, &mut self.security.cipher),
            "token_ttl_secs" => parse_secs(key, value, &mut self.security.token_ttl),
            "bind_host" => self.server.bind_host = value.to_string(),
            "read_timeout_secs" => parse_secs(key, value, &mut self.server.read_timeout),
            "shutdown_timeout_secs" => parse_secs(key, value, &mut self.server.shutdown_timeout),
            "max_connections" => parse_into(key, value, &mut self.server.max_connections),
            "rate_limit_max_requests" => parse_into(key, value, &mut self.rate_limit.max_requests),
            "rate_limit_window_secs" => parse_secs(key, value, &mut self.rate_limit.window),
            "data_dir" => self.persistence.data_dir = PathBuf::from(value),
            "save_interval_secs" => parse_secs(key, value, &mut self.persistence.save_interval),
            "tick_rate" => parse_into(key, value, &mut self.game.tick_rate),
            "grace_period_secs" => parse_secs(key, value, &mut self.game.grace_period),
            "max_players" => parse_into(key, value, &mut self.game.max_players),
            "game_read_timeout_secs" => parse_secs(key, value, &mut self.game.read_timeout),
            "max_characters" => parse_into(key, value, &mut self.accounts.max_characters),
            "max_failed_logins" => parse_into(key, value, &mut self.accounts.max_failed_logins),
            "chat_history" => parse_into(key, value, &mut self.chat.history_len),
            "log_level" => match Level::from_str(value) {
                Ok(level) => self.logging.log_level = level,
                Err(_) => warn!(key, value, "Invalid log level, keeping default"),
            },
            "log_json" => parse_into(key, value, &mut self.logging.json_format),
            _ => warn!(key, "Unknown config key ignored"),
        }
    }

    /// Override selected settings from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var("REALM_SHARED_SECRET") {
            self.security.shared_secret = secret;
        }
        if let Ok(key) = std::env::var("REALM_SERVICE_KEY") {
            self.security.service_key = key;
        }
        if let Ok(dir) = std::env::var("REALM_DATA_DIR") {
            self.persistence.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("REALM_LOG") {
            if let Ok(level) = Level::from_str(&level) {
                self.logging.log_level = level;
            }
        }
    }

    /// Render back to the `key=value` format.
    pub fn to_kv_string(&self) -> String {
        let p = &self.peers;
        let mut out = String::from("# realm server configuration\n");
        for (name, ep) in [
            ("login", &p.login),
            ("character", &p.character),
            ("game", &p.game),
            ("chat", &p.chat),
            ("quest", &p.quest),
        ] {
            out.push_str(&format!("{name}_server_host={}\n", ep.host));
            out.push_str(&format!("{name}_server_port={}\n", ep.port));
        }
        out.push_str(&format!("cipher={}\n", self.security.cipher.as_str()));
        out.push_str(&format!("token_ttl_secs={}\n", self.security.token_ttl.as_secs()));
        out.push_str(&format!("read_timeout_secs={}\n", self.server.read_timeout.as_secs()));
        out.push_str(&format!("max_connections={}\n", self.server.max_connections));
        out.push_str(&format!("rate_limit_max_requests={}\n", self.rate_limit.max_requests));
        out.push_str(&format!("rate_limit_window_secs={}\n", self.rate_limit.window.as_secs()));
        out.push_str(&format!("data_dir={}\n", self.persistence.data_dir.display()));
        out.push_str(&format!("save_interval_secs={}\n", self.persistence.save_interval.as_secs()));
        out.push_str(&format!("tick_rate={}\n", self.game.tick_rate));
        out.push_str(&format!("grace_period_secs={}\n", self.game.grace_period.as_secs()));
        out.push_str(&format!("game_read_timeout_secs={}\n", self.game.read_timeout.as_secs()));
        out.push_str(&format!("max_characters={}\n", self.accounts.max_characters));
        out
    }

    /// Save configuration to a file in the `key=value` format
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_kv_string())
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.peers.validate());
        errors.extend(self.security.validate());
        errors.extend(self.server.validate());
        errors.extend(self.rate_limit.validate());
        errors.extend(self.game.validate());
        errors.extend(self.accounts.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|e| !e.starts_with("WARNING"))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_into<T: FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "Invalid config value, keeping default"),
    }
}

fn parse_secs(key: &str, value: &str, slot: &mut Duration) {
    match value.parse::<u64>() {
        Ok(secs) => *slot = Duration::from_secs(secs),
        Err(_) => warn!(key, value, "Invalid duration, keeping default"),
    }
}

/// Host and port of one peer service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where each service listens.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfig {
    pub login: Endpoint,
    pub character: Endpoint,
    pub game: Endpoint,
    pub chat: Endpoint,
    pub quest: Endpoint,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            login: Endpoint::new("127.0.0.1", LOGIN_PORT),
            character: Endpoint::new("127.0.0.1", CHARACTER_PORT),
            game: Endpoint::new("127.0.0.1", GAME_PORT),
            chat: Endpoint::new("127.0.0.1", CHAT_PORT),
            quest: Endpoint::new("127.0.0.1", QUEST_PORT),
        }
    }
}

impl PeerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, ep) in [
            ("login", &self.login),
            ("character", &self.character),
            ("game", &self.game),
            ("chat", &self.chat),
            ("quest", &self.quest),
        ] {
            if ep.host.is_empty() {
                errors.push(format!("{name} server host cannot be empty"));
            }
            if ep.port == 0 {
                errors.push(format!("{name} server port cannot be 0"));
            }
        }
        errors
    }
}

/// Secrets and cipher selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Keys every frame cipher and every session token.
    pub shared_secret: String,

    /// Presented by game servers to unlock character hand-off.
    pub service_key: String,

    pub cipher: CipherKind,

    /// How long an issued session token stays valid.
    #[serde(with = "duration_secs")]
    pub token_ttl: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: DEFAULT_SHARED_SECRET.to_string(),
            service_key: DEFAULT_SERVICE_KEY.to_string(),
            cipher: CipherKind::Aead,
            token_ttl: Duration::from_secs(3600),
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.shared_secret.len() < 8 {
            errors.push("Shared secret too short (minimum: 8 bytes)".to_string());
        } else if self.shared_secret == DEFAULT_SHARED_SECRET {
            errors.push("WARNING: Using the development shared secret".to_string());
        }
        if self.service_key.len() < 8 {
            errors.push("Service key too short (minimum: 8 bytes)".to_string());
        }
        if self.cipher == CipherKind::Keystream {
            errors.push(
                "WARNING: Legacy keystream cipher has no integrity protection".to_string(),
            );
        }
        if self.token_ttl.as_secs() < 60 {
            errors.push("Token TTL too short (minimum: 60s)".to_string());
        }
        errors
    }
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Interface every service binds to.
    pub bind_host: String,

    /// A connection that sends nothing for this long is closed.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Depth of each connection's outbound queue in broadcasting services.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: String::from("0.0.0.0"),
            read_timeout: timeout::DEFAULT_READ_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self, port: u16) -> String {
        format!("{}:{port}", self.bind_host)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_host.is_empty() {
            errors.push("Bind host cannot be empty".to_string());
        } else if self.bind_address(1).parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind host: '{}' (expected an IP address such as '0.0.0.0')",
                self.bind_host
            ));
        }

        if self.read_timeout.as_secs() < 1 {
            errors.push("Read timeout too short (minimum: 1s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.outbound_queue == 0 {
            errors.push("Outbound queue must be greater than 0".to_string());
        }

        errors
    }
}

/// Per-source accept limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,

    #[serde(with = "duration_secs")]
    pub window: Duration,

    /// How often stale entries are swept.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_requests == 0 {
            errors.push("Rate limit max requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            errors.push("Rate limit window cannot be 0".to_string());
        }
        if self.sweep_interval.is_zero() {
            errors.push("Rate limit sweep interval cannot be 0".to_string());
        }
        errors
    }
}

/// On-disk state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,

    #[serde(with = "duration_secs")]
    pub save_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("server_saves"),
            save_interval: Duration::from_secs(60),
        }
    }
}

/// Game service simulation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GameConfig {
    /// Ticks per second.
    pub tick_rate: u32,

    #[serde(with = "duration_secs")]
    pub grace_period: Duration,

    pub max_players: usize,

    /// Game clients send input every tick, so silence is noticed sooner
    /// than on the other services.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            grace_period: Duration::from_secs(15),
            max_players: 100,
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl GameConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.tick_rate == 0 || self.tick_rate > 240 {
            errors.push(format!(
                "Invalid tick rate: {} (valid range: 1-240)",
                self.tick_rate
            ));
        }
        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        }
        if self.read_timeout.as_secs() < 1 {
            errors.push("Game read timeout too short (minimum: 1s)".to_string());
        }
        errors
    }
}

/// Login and character roster limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub max_characters: usize,

    /// Failed logins allowed on one connection before it is closed.
    pub max_failed_logins: u32,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            max_characters: 5,
            max_failed_logins: 5,
        }
    }
}

impl AccountConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_characters == 0 || self.max_characters > 32 {
            errors.push(format!(
                "Invalid max characters per account: {} (valid range: 1-32)",
                self.max_characters
            ));
        }
        if self.max_failed_logins == 0 {
            errors.push("Max failed logins must be greater than 0".to_string());
        }
        errors
    }
}

/// Chat service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Messages replayed to a client when it joins.
    pub history_len: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_len: 100 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realm"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_parsing_skips_comments_and_blanks() {
        let config = RealmConfig::from_kv_str(
            "# peers\n\ncharacter_server_host = 10.0.0.5\ncharacter_server_port=4000\n  # indented comment\n",
        );
        assert_eq!(config.peers.character, Endpoint::new("10.0.0.5", 4000));
        assert_eq!(config.peers.login.port, LOGIN_PORT);
    }

    #[test]
    fn test_kv_bad_values_fall_back() {
        let config = RealmConfig::from_kv_str(
            "game_server_port=notaport\ntick_rate=-3\nunknown_key=1\nno equals sign\n",
        );
        assert_eq!(config.peers.game.port, GAME_PORT);
        assert_eq!(config.game.tick_rate, 60);
    }

    #[test]
    fn test_kv_round_trip() {
        let mut config = RealmConfig::default();
        config.peers.quest.port = 31000;
        config.game.grace_period = Duration::from_secs(30);
        config.security.cipher = CipherKind::Keystream;
        config.game.read_timeout = Duration::from_secs(45);

        let parsed = RealmConfig::from_kv_str(&config.to_kv_string());
        assert_eq!(parsed.peers.quest.port, 31000);
        assert_eq!(parsed.game.grace_period, Duration::from_secs(30));
        assert_eq!(parsed.security.cipher, CipherKind::Keystream);
        assert_eq!(parsed.game.read_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_game_read_timeout_is_separate_from_server() {
        let config = RealmConfig::from_kv_str("read_timeout_secs=600\ngame_read_timeout_secs=20\n");
        assert_eq!(config.server.read_timeout, Duration::from_secs(600));
        assert_eq!(config.game.read_timeout, Duration::from_secs(20));

        let mut zero = GameConfig::default();
        zero.read_timeout = Duration::ZERO;
        assert!(zero.validate().iter().any(|e| e.contains("Game read timeout")));
    }

    #[test]
    fn test_tick_interval() {
        let game = GameConfig::default();
        assert_eq!(game.tick_interval(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn test_default_only_warns() {
        let config = RealmConfig::default();
        assert!(config.validate().iter().all(|e| e.starts_with("WARNING")));
        assert!(config.validate_strict().is_ok());
    }
}
