//! Key-value persistence for the quota counters.
//!
//! The quota store only needs `get`/`set` of small string values, so the
//! seam is a minimal trait with a file-backed implementation (one file per
//! key, written on every set) and an in-memory one for tests and embedding.

use crate::error::{Result, TurnaroundError};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// String key-value storage with immediate durability on `set`.
pub trait KeyValueStore {
    /// Returns the stored value for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, durably before returning.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Rejects keys that would escape the store's root directory.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TurnaroundError::InvalidRequest("empty storage key".into()));
    }
    let path = Path::new(key);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TurnaroundError::InvalidRequest(format!(
            "storage key must be a plain name: {key:?}"
        ))),
    }
}

/// File-backed store: each key is a file under the root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        std::fs::write(&path, value)?;
        Ok(())
    }
}

/// In-memory store for tests and non-persistent embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
