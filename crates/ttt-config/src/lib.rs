//! Configuration system for the tic-tac-toe client shell.
//!
//! Provides runtime-configurable settings that persist to disk as RON files,
//! CLI overrides via clap, hot-reload detection, and the small key/value
//! store ([`Prefs`]) that survives process restarts.

mod cli;
mod config;
mod error;
mod prefs;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, GameplayConfig, MAX_REJOIN_SECONDS, MIN_POLL_INTERVAL_MS,
    MatchmakingConfig, OpCodes, RejoinConfig, ServerConfig,
};
pub use error::ConfigError;
pub use prefs::{DEVICE_ID_KEY, LAST_HOST_KEY, LAST_MATCH_ID_KEY, Prefs};
