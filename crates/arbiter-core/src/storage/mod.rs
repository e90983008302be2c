//! Repository abstraction over the backing store.
//!
//! Business logic only sees [`Repository`]; the backing store (flat JSON
//! files, embedded KV, external DB) is swappable without touching it.
//! Keys are slash-separated paths (e.g. `alerts/00000042`), values are
//! JSON documents.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error reading or writing the backing store.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key contains characters the store cannot represent.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A minimal durable key-value repository.
pub trait Repository: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Lists all keys beginning with `prefix`, in ascending key order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes the value under `key`. Returns whether a value existed.
    fn delete(&self, key: &str) -> Result<bool>;
}

/// In-memory repository for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }
}

/// File-backed repository storing one JSON document per key.
///
/// Writes go through a temp file and rename so a crashed write never
/// leaves a truncated document behind.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Maps a key to its on-disk file name.
    ///
    /// Slashes are escaped as `__` so nested keys live in a flat
    /// directory; keys may not contain `__` or path traversal.
    fn file_name(key: &str) -> Result<String> {
        if key.is_empty() || key.contains("__") || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(format!("{}.json", key.replace('/', "__")))
    }

    fn key_from_file(name: &str) -> Option<String> {
        name.strip_suffix(".json").map(|stem| stem.replace("__", "/"))
    }
}

impl Repository for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.root.join(Self::file_name(key)?);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.root.join(Self::file_name(key)?);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = Self::key_from_file(name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.root.join(Self::file_name(key)?);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
