//! Configuration error types.

/// Errors that can occur when loading, saving, or parsing configuration and prefs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a file from disk.
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    /// Failed to write a file to disk.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Failed to serialize to RON.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),
}
