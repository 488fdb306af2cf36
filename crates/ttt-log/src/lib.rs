//! Structured logging for the tic-tac-toe client.
//!
//! Console output with uptime timestamps and module paths, plus JSON file
//! logging in debug builds for post-mortem analysis of connection drops.
//! `RUST_LOG` wins over the configured log level.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use ttt_config::Config;

/// Filter used when neither `RUST_LOG` nor the config names a level.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written in debug builds.
pub const LOG_FILE_NAME: &str = "ttt-client.log";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - Optional directory for the JSON log file (debug builds only)
/// * `debug_build` - Whether file logging is enabled
/// * `config` - Optional configuration supplying the log level
///
/// # Examples
///
/// ```no_run
/// use ttt_log::init_logging;
/// use ttt_config::Config;
///
/// let config = Config::default();
/// init_logging(None, false, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = filter_for(config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // stdout belongs to the interactive prompt.
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Resolve the filter string from the config, falling back to [`DEFAULT_FILTER`].
pub fn filter_for(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter = default_env_filter();
        assert!(format!("{}", filter).contains("info"));
    }

    #[test]
    fn test_filter_from_config() {
        let mut config = Config::default();
        config.debug.log_level = "warn,ttt_net=debug".to_string();
        assert_eq!(filter_for(Some(&config)), "warn,ttt_net=debug");
    }

    #[test]
    fn test_empty_config_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_for(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_for(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_env_filter_parsing() {
        let valid_filters = [
            "info",
            "debug,ttt_net=trace",
            "warn,ttt_net::rejoin=debug",
            "error",
        ];

        for filter_str in &valid_filters {
            let result = EnvFilter::try_from(*filter_str);
            assert!(result.is_ok(), "Failed to parse filter: {}", filter_str);
        }
    }

    #[test]
    fn test_file_logger_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_file_path = temp_dir.path().join(LOG_FILE_NAME);
        assert_eq!(log_file_path.file_name().unwrap(), LOG_FILE_NAME);
    }
}
