//! Bank loading

use std::sync::Arc;

use fmx_engine::{AudioEngine, EngineError};

use crate::error::EngineResultExt;

pub struct BankService {
    engine: Arc<dyn AudioEngine>,
}

impl BankService {
    pub fn new(engine: Arc<dyn AudioEngine>) -> Self {
        Self { engine }
    }

    /// Blocking load; an already-loaded bank counts as success
    pub fn load_bank(&self, name: &str, load_sample_data: bool) -> bool {
        match self.engine.load_bank(name, true) {
            Ok(()) => log::info!("[Banks] Loaded '{}'", name),
            Err(EngineError::BankAlreadyLoaded) => {
                log::debug!("[Banks] '{}' already loaded", name);
            }
            Err(e) => {
                log::error!("[Banks] Failed to load '{}': {}", name, e);
                return false;
            }
        }
        if load_sample_data {
            if let Err(e) = self.engine.load_bank_sample_data(name).op("load sample data", name) {
                log::warn!("[Banks] {}", e);
            }
        }
        true
    }

    /// Load several banks; returns how many are loaded afterwards
    pub fn load_banks<S: AsRef<str>>(&self, names: &[S], load_sample_data: bool) -> usize {
        names
            .iter()
            .filter(|name| self.load_bank(name.as_ref(), load_sample_data))
            .count()
    }

    pub fn unload_bank(&self, name: &str) -> bool {
        match self.engine.unload_bank(name).op("unload bank", name) {
            Ok(()) => {
                log::info!("[Banks] Unloaded '{}'", name);
                true
            }
            Err(e) => {
                log::warn!("[Banks] {}", e);
                false
            }
        }
    }

    #[inline]
    pub fn is_bank_loaded(&self, name: &str) -> bool {
        self.engine.is_bank_loaded(name)
    }
}
