//! Command-line argument parsing for the client shell.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tic-tac-toe client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "ttt-client", about = "Tic-tac-toe realtime client")]
pub struct CliArgs {
    /// Server host. Falls back to the last connected host, then the config default.
    #[arg(long)]
    pub host: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable rejoining the last match.
    #[arg(long)]
    pub no_rejoin: bool,

    /// Seconds to keep trying to rejoin.
    #[arg(long)]
    pub rejoin_timeout: Option<f32>,

    /// Start searching for a match right after connecting.
    #[arg(long)]
    pub search: bool,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if args.no_rejoin {
            self.rejoin.enabled = false;
        }
        if let Some(timeout) = args.rejoin_timeout {
            self.rejoin.timeout_seconds = timeout;
        }
    }
}
