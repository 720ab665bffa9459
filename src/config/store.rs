//! Host-side persistence for the configuration object.

use std::path::PathBuf;
use std::sync::Mutex;

use super::Config;
use crate::error::{BridgeError, Result};

/// Persists the host configuration.
///
/// The bridge never owns configuration storage; it reads the current object,
/// mutates it and hands it back through this trait.
pub trait ConfigStore: Send + Sync {
    /// Load the configuration as stored.
    fn load(&self) -> Result<Config>;

    /// Replace the stored configuration.
    fn save(&self, config: &Config) -> Result<()>;

    /// Load the stored configuration with environment overrides applied.
    ///
    /// Only for reading; never pass the result to `save`.
    fn load_effective(&self) -> Result<Config> {
        Ok(self.load()?.with_env_overrides())
    }

    /// Load, mutate and save in one step, returning the saved value.
    fn update(&self, f: &mut dyn FnMut(&mut Config)) -> Result<Config> {
        let mut config = self.load()?;
        f(&mut config);
        self.save(&config)?;
        Ok(config)
    }
}

/// Store backed by a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.cardbridge/config.json`.
    pub fn default_location() -> Self {
        Self::new(Config::path())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config> {
        Config::read_from_path(&self.path)
    }

    fn save(&self, config: &Config) -> Result<()> {
        config.save_to_path(&self.path)
    }
}

/// In-memory store for hosts that keep configuration elsewhere.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Config>,
    saves: Mutex<usize>,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Config> {
        self.config
            .lock()
            .map(|c| c.clone())
            .map_err(|_| BridgeError::Config("config store lock poisoned".to_string()))
    }

    fn save(&self, config: &Config) -> Result<()> {
        let mut guard = self
            .config
            .lock()
            .map_err(|_| BridgeError::Config("config store lock poisoned".to_string()))?;
        *guard = config.clone();
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}
