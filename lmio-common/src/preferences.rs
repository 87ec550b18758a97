//! Persisted preference store
//!
//! An opaque key/value map the backend writes its session choices into (token,
//! mode, template, assets path) so the next session can restore them. Values are
//! JSON because a template's serialized content is stored alongside plain strings.

use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Well-known preference keys
pub mod keys {
    pub const BACKEND_TYPE: &str = "BACKEND_TYPE";
    pub const DROPBOX_TOKEN: &str = "BACKEND_DROPBOX_TOKEN";
    pub const DROPBOX_MODE: &str = "BACKEND_DROPBOX_MODE";
    pub const DROPBOX_TEMPLATE_PATH: &str = "BACKEND_DROPBOX_TEMPLATE_PATH";
    pub const DROPBOX_TEMPLATE_CONTENT: &str = "BACKEND_DROPBOX_TEMPLATE_CONTENT";
    pub const DROPBOX_ASSETS_PATH: &str = "BACKEND_DROPBOX_ASSETS_PATH";
}

/// Shared handle to the preference map
///
/// Clones share the same map. When constructed with a path, `save` flushes the
/// whole map to that file as JSON.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
    path: Option<PathBuf>,
}

impl Preferences {
    /// Preferences that live only for this process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load preferences from a JSON file; a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            values: Arc::new(Mutex::new(values)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Update several keys at once, flushing to disk when `save` is set
    pub fn set<I, K>(&self, pairs: I, save: bool) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        {
            let mut values = self.lock();
            for (key, value) in pairs {
                values.insert(key.into(), value);
            }
        }

        if save {
            self.save()?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Write the map to the backing file (no-op for in-memory stores)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&*self.lock())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        debug!(path = %path.display(), "Preferences saved");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
