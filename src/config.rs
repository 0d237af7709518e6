//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `RELAYHUB_*` environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broker::BrokerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Result of [`Config::load_default`]
#[derive(Debug)]
pub struct DefaultConfig {
    pub config: Config,
    /// File the config came from; `None` means defaults plus environment
    pub source: Option<PathBuf>,
    /// Files that exist but failed to load
    pub skipped: Vec<(PathBuf, ConfigError)>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Per-session settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_message_buffer_size")]
    pub message_buffer_size: usize,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,

    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    #[serde(default = "default_ping_period")]
    pub ping_period_ms: u64,

    #[serde(default = "default_hub_queue_size")]
    pub hub_queue_size: usize,
}

fn default_message_buffer_size() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_ping_period() -> u64 {
    default_pong_wait() * 9 / 10
}

fn default_hub_queue_size() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_buffer_size: default_message_buffer_size(),
            max_message_size: default_max_message_size(),
            write_wait_ms: default_write_wait(),
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: default_ping_period(),
            hub_queue_size: default_hub_queue_size(),
        }
    }
}

impl From<&SessionConfig> for BrokerConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            message_buffer_size: config.message_buffer_size,
            max_message_size: config.max_message_size,
            write_wait: Duration::from_millis(config.write_wait_ms),
            pong_wait: Duration::from_millis(config.pong_wait_ms),
            ping_period: Duration::from_millis(config.ping_period_ms),
            hub_queue_size: config.hub_queue_size,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::parse(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// Nothing is logged here since tracing is configured from the result;
    /// the caller reports [`DefaultConfig::source`] and
    /// [`DefaultConfig::skipped`] once it is.
    pub fn load_default() -> Result<DefaultConfig, ConfigError> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("relayhub").join("config.toml")),
            Some(PathBuf::from("/etc/relayhub/config.toml")),
            Some(PathBuf::from("./relayhub.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first candidate that exists and is valid, else env only
    fn load_first(candidates: &[PathBuf]) -> Result<DefaultConfig, ConfigError> {
        let mut skipped = Vec::new();

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    return Ok(DefaultConfig {
                        config,
                        source: Some(path.clone()),
                        skipped,
                    })
                }
                Err(e) => skipped.push((path.clone(), e)),
            }
        }

        Ok(DefaultConfig {
            config: Self::from_env()?,
            source: None,
            skipped,
        })
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.message_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "session.message_buffer_size must be greater than 0".to_string(),
            ));
        }
        if session.hub_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "session.hub_queue_size must be greater than 0".to_string(),
            ));
        }
        if session.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "session.max_message_size must be greater than 0".to_string(),
            ));
        }
        if session.ping_period_ms == 0 || session.write_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.ping_period_ms and session.write_wait_ms must be greater than 0"
                    .to_string(),
            ));
        }
        if session.pong_wait_ms <= session.ping_period_ms {
            return Err(ConfigError::Invalid(format!(
                "session.pong_wait_ms ({}) must exceed session.ping_period_ms ({})",
                session.pong_wait_ms, session.ping_period_ms
            )));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    fn parse(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparsable numbers are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // Server overrides
        if let Some(host) = lookup("RELAYHUB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed(lookup("RELAYHUB_PORT")) {
            self.server.port = port;
        }

        // Session overrides
        if let Some(size) = parsed(lookup("RELAYHUB_MESSAGE_BUFFER_SIZE")) {
            self.session.message_buffer_size = size;
        }
        if let Some(size) = parsed(lookup("RELAYHUB_MAX_MESSAGE_SIZE")) {
            self.session.max_message_size = size;
        }
        if let Some(ms) = parsed(lookup("RELAYHUB_WRITE_WAIT_MS")) {
            self.session.write_wait_ms = ms;
        }
        if let Some(ms) = parsed(lookup("RELAYHUB_PONG_WAIT_MS")) {
            self.session.pong_wait_ms = ms;
        }
        if let Some(ms) = parsed(lookup("RELAYHUB_PING_PERIOD_MS")) {
            self.session.ping_period_ms = ms;
        }
        if let Some(size) = parsed(lookup("RELAYHUB_HUB_QUEUE_SIZE")) {
            self.session.hub_queue_size = size;
        }

        // Logging overrides
        if let Some(level) = lookup("RELAYHUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("RELAYHUB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# relayhub Configuration
#
# Environment variables override these settings:
# - RELAYHUB_HOST
# - RELAYHUB_PORT
# - RELAYHUB_MESSAGE_BUFFER_SIZE
# - RELAYHUB_MAX_MESSAGE_SIZE
# - RELAYHUB_WRITE_WAIT_MS
# - RELAYHUB_PONG_WAIT_MS
# - RELAYHUB_PING_PERIOD_MS
# - RELAYHUB_HUB_QUEUE_SIZE
# - RELAYHUB_LOG_LEVEL
# - RELAYHUB_LOG_FORMAT

[server]
# HTTP / WebSocket server host
host = "0.0.0.0"

# HTTP / WebSocket server port
port = 8090

# Maximum HTTP request body size (bytes)
max_body_size = 1048576

[session]
# Outbound messages buffered per session before new ones are dropped
message_buffer_size = 256

# Largest inbound message accepted (bytes)
max_message_size = 65536

# Time allowed to write one frame (ms)
write_wait_ms = 10000

# Time allowed between inbound frames, pongs included (ms)
pong_wait_ms = 60000

# Keepalive ping interval (ms), must be less than pong_wait_ms
ping_period_ms = 54000

# Commands buffered per hub
hub_queue_size = 256

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
