//! Key/value storage shared between contexts

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use super::BridgeError;

/// JSON key/value store. `set(key, None)` removes the key.
pub trait BridgeStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, BridgeError>;
    fn set(&self, key: &str, value: Option<Value>) -> Result<(), BridgeError>;
}

/// Storage in a single JSON object file
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, BridgeError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// Write via a sibling temp file so readers never see a partial file
    fn write_all(&self, map: Map<String, Value>) -> Result<(), BridgeError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(map))?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl BridgeStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, BridgeError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<(), BridgeError> {
        let _guard = self.lock.lock();
        let mut map = self.read_all()?;
        match value {
            Some(value) => map.insert(key.to_string(), value),
            None => map.remove(key),
        };
        self.write_all(map)?;
        debug!("Wrote {} to {}", key, self.path.display());
        Ok(())
    }
}

/// In-process storage
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
}

impl BridgeStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, BridgeError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<Value>) -> Result<(), BridgeError> {
        let mut values = self.values.lock();
        match value {
            Some(value) => values.insert(key.to_string(), value),
            None => values.remove(key),
        };
        Ok(())
    }
}
