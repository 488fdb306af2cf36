//! Small persisted key/value store for state that must survive restarts.
//!
//! Values live in `prefs.ron` inside the data directory. A missing file or a
//! missing key is a normal first-run state, never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::ConfigError;

/// Stable per-device identity used for authentication.
pub const DEVICE_ID_KEY: &str = "device_id";
/// Host of the last successful connection.
pub const LAST_HOST_KEY: &str = "last_host";
/// Id of the last joined match, kept for rejoin.
pub const LAST_MATCH_ID_KEY: &str = "last_match_id";

const PREFS_FILE: &str = "prefs.ron";

/// String key/value store, optionally backed by a RON file.
///
/// Every mutation is written through to disk when a backing file is set.
pub struct Prefs {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl Prefs {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load `prefs.ron` from `data_dir`, starting empty if the file is absent.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(PREFS_FILE);
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(ConfigError::ReadError)?;
            ron::from_str(&contents).map_err(ConfigError::ParseError)?
        } else {
            BTreeMap::new()
        };
        log::debug!("Loaded {} prefs from {}", values.len(), path.display());
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Return the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Whether `key` has a value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Store `value` under `key` and persist.
    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut values = self.lock();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    /// Delete `key` and persist. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<(), ConfigError> {
        let mut values = self.lock();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&values)
    }

    /// Return the device identity, creating and persisting one on first use.
    pub fn device_id(&self) -> Result<String, ConfigError> {
        let mut values = self.lock();
        if let Some(id) = values.get(DEVICE_ID_KEY).filter(|id| !id.is_empty()) {
            return Ok(id.clone());
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        values.insert(DEVICE_ID_KEY.to_string(), id.clone());
        self.persist(&values)?;
        log::info!("Created new device identity");
        Ok(id)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::WriteError)?;
        }
        let serialized = ron::ser::to_string_pretty(values, ron::ser::PrettyConfig::new())
            .map_err(ConfigError::SerializeError)?;
        std::fs::write(path, serialized).map_err(ConfigError::WriteError)
    }
}

impl Default for Prefs {
    fn default() -> Self {
        Self::in_memory()
    }
}
