//! Durable local state
//!
//! Small JSON key/value store that survives restarts: the enabled flag,
//! cumulative usage statistics and the rolling error log. Writes happen
//! on a spawned task so callers never block on the filesystem.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::types::Result;

/// Storage key for the enabled flag
pub const KEY_ENABLED: &str = "proxyEnabled";
/// Storage key for cumulative usage statistics
pub const KEY_USAGE_STATS: &str = "usageStats";
/// Storage key for the persisted rolling error log
pub const KEY_ERROR_LOG: &str = "errorLog";

/// JSON-file-backed key/value store
///
/// Cloning is cheap; clones share the same map and target file.
#[derive(Clone)]
pub struct StateStore {
    map: Arc<Mutex<HashMap<String, Value>>>,
    path: Option<PathBuf>,
}

impl StateStore {
    /// In-memory store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
            path: None,
        }
    }

    /// Open a store backed by `path`, loading any existing contents
    ///
    /// A missing file starts empty; a corrupt file is abandoned with a
    /// warning rather than failing startup.
    pub fn open(path: PathBuf) -> Self {
        let map = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Value>>(&contents) {
                Ok(map) => {
                    info!(path = %path.display(), keys = map.len(), "State store loaded");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "State file unreadable, starting fresh");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            map: Arc::new(Mutex::new(map)),
            path: Some(path),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.map.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.map.lock().unwrap().remove(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set(key, Value::Bool(value));
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Write the current contents to disk
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = {
            let map = self.map.lock().unwrap();
            serde_json::to_string_pretty(&*map)?
        };
        tokio::fs::write(path, contents).await?;
        debug!(path = %path.display(), "State store saved");
        Ok(())
    }

    /// Fire-and-forget save on a spawned task
    pub fn save_async(&self) {
        if self.path.is_none() {
            return;
        }
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save().await {
                warn!(error = %e, "State store save failed");
            }
        });
    }
}
