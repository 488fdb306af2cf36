//! Configuration structs with sensible defaults and RON persistence.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on a rejoin time budget, in seconds (one day).
pub const MAX_REJOIN_SECONDS: f32 = 86_400.0;

/// Shortest delay between rejoin attempts, in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Match server connection settings.
    pub server: ServerConfig,
    /// Matchmaking request parameters.
    pub matchmaking: MatchmakingConfig,
    /// Gameplay timing mirrored from the server.
    pub gameplay: GameplayConfig,
    /// Match-channel message-type codes shared with the server.
    pub opcodes: OpCodes,
    /// Rejoin behaviour after a restart or a dropped connection.
    pub rejoin: RejoinConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Match server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host used when neither the CLI nor the saved prefs name one.
    pub default_host: String,
    /// Server port.
    pub port: u16,
    /// Key presented when authenticating a device.
    pub server_key: String,
    /// Timeout for opening a TCP connection, in seconds.
    pub connect_timeout_seconds: u32,
    /// Timeout for a single request/reply round trip, in seconds.
    pub request_timeout_seconds: u32,
    /// Interval between heartbeat pings, in seconds.
    pub heartbeat_interval_seconds: u32,
    /// Silence after which the socket is considered dead, in seconds.
    pub heartbeat_timeout_seconds: u32,
}

/// Matchmaking request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Matchmaker query string; empty matches anyone.
    pub query: String,
    /// Minimum number of players to pair.
    pub min_count: u32,
    /// Maximum number of players to pair.
    pub max_count: u32,
    /// String properties attached to the ticket.
    pub properties: HashMap<String, String>,
}

/// Gameplay timing. Keep in sync with the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameplayConfig {
    /// Per-turn timeout in seconds.
    pub turn_timeout_seconds: u32,
    /// Server tick rate used to interpret `deadline_tick` (ticks per second).
    pub tick_rate: u32,
}

/// Message-type codes used on the match channel.
///
/// The values are a deployment-wide contract with the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpCodes {
    /// Server to client: board snapshot.
    pub state: i64,
    /// Client to server: player action.
    pub action: i64,
    /// Server to client: error report.
    pub error: i64,
    /// Server to client: terminal board snapshot.
    pub game_over: i64,
}

/// Rejoin behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RejoinConfig {
    /// Attempt to rejoin the last match on connect and after a drop.
    pub enabled: bool,
    /// Seconds to keep trying before giving up. Never less than one second.
    pub timeout_seconds: f32,
    /// Fixed delay between attempts, in milliseconds.
    pub poll_interval_ms: u64,
    /// Start a rejoin attempt automatically when the socket drops.
    pub on_drop: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_host: "127.0.0.1".to_string(),
            port: 7350,
            server_key: "defaultkey".to_string(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 10,
            heartbeat_interval_seconds: 5,
            heartbeat_timeout_seconds: 15,
        }
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        let mut properties = HashMap::new();
        properties.insert("engine".to_string(), "rust".to_string());
        Self {
            query: String::new(),
            min_count: 2,
            max_count: 2,
            properties,
        }
    }
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            turn_timeout_seconds: 10,
            tick_rate: 5,
        }
    }
}

impl Default for OpCodes {
    fn default() -> Self {
        Self {
            state: 1,
            action: 2,
            error: 3,
            game_over: 4,
        }
    }
}

impl Default for RejoinConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 6.0,
            poll_interval_ms: 300,
            on_drop: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_seconds.max(1)))
    }

    /// Request/reply timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout_seconds.max(1)))
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_interval_seconds.max(1)))
    }

    /// Heartbeat silence timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat_timeout_seconds.max(1)))
    }
}

impl RejoinConfig {
    /// Total time budget for one rejoin attempt, clamped to
    /// 1 s ..= [`MAX_REJOIN_SECONDS`].
    pub fn budget(&self) -> Duration {
        if self.timeout_seconds.is_nan() {
            return Duration::from_secs(1);
        }
        Duration::from_secs_f32(self.timeout_seconds.clamp(1.0, MAX_REJOIN_SECONDS))
    }

    /// Fixed delay between attempts, at least [`MIN_POLL_INTERVAL_MS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
