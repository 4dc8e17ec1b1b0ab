//! Persisted key-value volume store

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use fmx_core::{FmxError, FmxResult};

/// Seam for the host's persistent settings storage
pub trait VolumeStore: Send + Sync {
    fn get_f32(&self, key: &str) -> Option<f32>;

    fn set_f32(&self, key: &str, value: f32) -> FmxResult<()>;

    fn contains(&self, key: &str) -> bool {
        self.get_f32(key).is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, f32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: impl Into<String>, value: f32) -> Self {
        self.values.lock().insert(key.into(), value);
        self
    }
}

impl VolumeStore for MemoryStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.values.lock().get(key).copied()
    }

    fn set_f32(&self, key: &str, value: f32) -> FmxResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON FILE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON object on disk, rewritten on every `set_f32`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, f32>>,
}

impl JsonFileStore {
    /// Open a store; a missing or malformed file loads as empty
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("[Audio] Ignoring malformed volume store {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, f32>) -> FmxResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| FmxError::Serialization(e.to_string()))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl VolumeStore for JsonFileStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.values.lock().get(key).copied()
    }

    fn set_f32(&self, key: &str, value: f32) -> FmxResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }
}
