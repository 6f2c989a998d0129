//! Per-mode session ids issued by the backend, cached in memory and on disk.

use super::mode::ChatMode;
use directories::ProjectDirs;
use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum SessionStoreError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Encode(toml::ser::Error),
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStoreError::Read { path, source } => {
                write!(f, "Failed to read sessions at {}: {}", path.display(), source)
            }
            SessionStoreError::Parse { path, source } => {
                write!(f, "Failed to parse sessions at {}: {}", path.display(), source)
            }
            SessionStoreError::Encode(source) => write!(f, "Failed to encode sessions: {source}"),
            SessionStoreError::Write { path, source } => {
                write!(f, "Failed to write sessions to {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for SessionStoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionStoreError::Read { source, .. } => Some(source),
            SessionStoreError::Parse { source, .. } => Some(source),
            SessionStoreError::Encode(source) => Some(source),
            SessionStoreError::Write { source, .. } => Some(source),
        }
    }
}

/// Durable key/value storage for session ids.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError>;
    fn remove(&self, key: &str) -> Result<(), SessionStoreError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// A flat TOML table of `key = "value"` pairs, rewritten atomically on every
/// change.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `sessions.toml` in the platform data directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "troupe", "troupe").map(|dirs| dirs.data_dir().join("sessions.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SessionStoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| SessionStoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| SessionStoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), SessionStoreError> {
        let write_error = |source| SessionStoreError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = self.path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_error)?;
        }

        let contents = toml::to_string(entries).map_err(SessionStoreError::Encode)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_error)?;
        temp_file.write_all(contents.as_bytes()).map_err(write_error)?;
        temp_file.as_file_mut().sync_all().map_err(write_error)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_error(err.error))?;
        Ok(())
    }

    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), SessionStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(SessionStoreError::Parse { path, source }) => {
                warn!(path = %path.display(), error = %source, "Replacing unreadable session file");
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        change(&mut entries);
        self.save(&entries)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Process-wide view of the current session id per mode.
///
/// Reads are served from memory. Writes update memory first, then storage;
/// a storage failure is reported but the in-memory id stays current.
pub struct SessionRegistry {
    ids: Mutex<HashMap<ChatMode, String>>,
    store: Box<dyn SessionStore>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SessionRegistry").field("ids", &*ids).finish()
    }
}

impl SessionRegistry {
    /// Build a registry and rehydrate every mode from `store`. Unreadable
    /// entries are logged and skipped.
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        let mut ids = HashMap::new();
        for mode in ChatMode::ALL {
            match store.get(&mode.storage_key()) {
                Ok(Some(id)) if !id.is_empty() => {
                    debug!(mode = %mode, session_id = %id, "Restored session id");
                    ids.insert(mode, id);
                }
                Ok(_) => {}
                Err(err) => warn!(mode = %mode, error = %err, "Could not restore session id"),
            }
        }
        Self {
            ids: Mutex::new(ids),
            store,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySessionStore::default()))
    }

    pub fn get(&self, mode: ChatMode) -> Option<String> {
        let ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.get(&mode).cloned()
    }

    pub fn set(&self, mode: ChatMode, id: &str) -> Result<(), SessionStoreError> {
        {
            let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
            ids.insert(mode, id.to_string());
        }
        self.store.set(&mode.storage_key(), id)
    }

    pub fn clear(&self, mode: ChatMode) -> Result<(), SessionStoreError> {
        {
            let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
            ids.remove(&mode);
        }
        self.store.remove(&mode.storage_key())
    }
}
