//! Token storage backends
//!
//! The client only talks to the [`TokenStorage`] trait. Three backends ship
//! with the crate: a process-local concurrent map, a JSON file that survives
//! restarts, and a no-op store for contexts without persistent storage.

use crate::error::{ClientError, Result};
use papaya::HashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key/value storage for credentials
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read the stored access token, treating empty values as absent
pub fn access_token(storage: &dyn TokenStorage) -> Option<String> {
    storage.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())
}

/// Read the stored refresh token, treating empty values as absent
pub fn refresh_token(storage: &dyn TokenStorage) -> Option<String> {
    storage.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty())
}

/// Write both tokens
pub fn store_tokens(storage: &dyn TokenStorage, access: &str, refresh: &str) -> Result<()> {
    storage.set(ACCESS_TOKEN_KEY, access)?;
    storage.set(REFRESH_TOKEN_KEY, refresh)
}

/// Remove both tokens, attempting the second even if the first fails
pub fn clear_tokens(storage: &dyn TokenStorage) -> Result<()> {
    let access = storage.remove(ACCESS_TOKEN_KEY);
    let refresh = storage.remove(REFRESH_TOKEN_KEY);
    access.and(refresh)
}

/// Thread-safe in-memory token store using Papaya HashMap
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    entries: Arc<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenStorage for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.pin().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.pin().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.pin().remove(key);
        Ok(())
    }
}

/// Storage for contexts without a persistent store: nothing is ever available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenStore;

impl TokenStorage for NoopTokenStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Token store persisted as a small JSON object on disk
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store backed by `path`, creating parent directories as needed
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ClientError::Storage(format!("Failed to create token storage dir: {e}"))
                })?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Create a store in the default location (`<config dir>/materials-dashboard/tokens.json`)
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| ClientError::Storage("Cannot determine config directory".to_string()))?;
        Self::new(base.join("materials-dashboard").join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        if !self.path.exists() {
            return BTreeMap::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to parse token file, treating as logged out");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                BTreeMap::new()
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).map_err(|e| {
                    ClientError::Storage(format!("Failed to delete token file: {e}"))
                })?;
                info!(path = %self.path.display(), "Deleted token file");
            }
            return Ok(());
        }

        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)
            .map_err(|e| ClientError::Storage(format!("Failed to write token file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        debug!(path = %self.path.display(), "Saved token file");
        Ok(())
    }
}

impl TokenStorage for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }
}
