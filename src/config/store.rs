//! Flat JSON key-value store used for cross-restart state.
//!
//! Every namespace maps to one file under the persist directory. The file
//! holds a single JSON object and is always read and written as a whole.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the persist store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize store: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store file {} does not contain a JSON object", .0.display())]
    NotAnObject(PathBuf),
}

/// One namespace of the persist store.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl JsonStore {
    /// Opens (or lazily creates) the store file for `namespace` in `dir`.
    ///
    /// A missing file reads as an empty store; nothing is written until
    /// [`JsonStore::save`] is called.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self, StoreError> {
        let path = dir
            .as_ref()
            .join(format!("{}.json", sanitize_namespace(namespace)));
        let data = read_object(&path)?;
        debug!("Opened store {} ({} keys)", path.display(), data.len());
        Ok(Self { path, data })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the whole file, discarding unsaved changes.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.data = read_object(&self.path)?;
        Ok(())
    }

    /// Writes the whole store to disk.
    ///
    /// The data goes to a temporary sibling first and is renamed over the
    /// original, so a crash mid-write never leaves a truncated file.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved store {}", self.path.display());
        Ok(())
    }

    /// Reads and deserializes a value.
    ///
    /// A value with an unexpected shape reads as `None`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.data.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(
                    "Ignoring malformed value for '{}' in {}: {}",
                    key,
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Reads a value, falling back to `T::default()`.
    #[must_use]
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    /// Stores a value (in memory, call [`JsonStore::save`] to persist).
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        self.data.insert(key.to_owned(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Removes a key, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Checks whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks if the store has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject(path.to_path_buf())),
    }
}

/// Maps a namespace to a safe file stem.
fn sanitize_namespace(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
