//! Key-value preference storage.
//!
//! Front ends remember small values between sessions (for example the last
//! sticker placement). The pipeline itself never touches this; callers inject
//! a store wherever they need persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{StickerError, StickerResult};

/// A string key-value store.
pub trait PreferenceStore {
    /// Read a value, `None` when absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&mut self, key: &str, value: &str) -> StickerResult<()>;

    /// Remove a value. Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> StickerResult<()>;
}

/// Preferences kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> StickerResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StickerResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Preferences persisted as a flat JSON object on disk.
///
/// Every write rewrites the whole file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unparsable one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> StickerResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt preference file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> StickerResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, json).map_err(|e| {
            StickerError::preferences(format!(
                "Failed to write preferences {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> StickerResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> StickerResult<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
