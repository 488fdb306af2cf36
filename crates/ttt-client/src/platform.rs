//! OS directory resolution for config, prefs and logs.

use std::path::{Path, PathBuf};
use std::{fmt, io};

/// Errors that can occur while resolving or creating directories.
#[derive(Debug)]
pub enum PlatformError {
    /// The OS did not provide a configuration directory.
    NoConfigDir,
    /// Directory creation failed.
    Io(io::Error),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConfigDir => write!(f, "could not determine OS configuration directory"),
            Self::Io(e) => write!(f, "platform I/O error: {e}"),
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::NoConfigDir => None,
        }
    }
}

impl From<io::Error> for PlatformError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Per-user directories for the client.
///
/// Follows OS conventions (XDG on Linux, Known Folders on Windows, Library on
/// macOS).
pub struct PlatformDirs {
    /// `config.ron`.
    pub config_dir: PathBuf,
    /// `prefs.ron`: device id, last host, last match id.
    pub data_dir: PathBuf,
    /// Log files.
    pub log_dir: PathBuf,
}

const APP_NAME: &str = "ttt-client";

impl PlatformDirs {
    /// Resolve directories without creating them.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NoConfigDir`] if the OS does not expose a
    /// configuration directory.
    pub fn resolve() -> Result<Self, PlatformError> {
        let app_config = dirs::config_dir()
            .ok_or(PlatformError::NoConfigDir)?
            .join(APP_NAME);
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| app_config.clone())
            .join(APP_NAME);

        Ok(Self {
            config_dir: app_config.join("config"),
            data_dir,
            log_dir: app_config.join("logs"),
        })
    }

    /// Resolve directories and create them on disk.
    pub fn resolve_and_create() -> Result<Self, PlatformError> {
        let dirs = Self::resolve()?;
        dirs.create_dirs()?;
        Ok(dirs)
    }

    /// Directories rooted under `root`, for tests and portable installs.
    pub fn resolve_with_root(root: &Path) -> Self {
        let app_dir = root.join(APP_NAME);
        Self {
            config_dir: app_dir.join("config"),
            data_dir: app_dir.join("data"),
            log_dir: app_dir.join("logs"),
        }
    }

    /// Create every directory in `self`.
    pub fn create_dirs(&self) -> Result<(), PlatformError> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}
