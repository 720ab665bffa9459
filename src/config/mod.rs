//! Configuration management for CardBridge
//!
//! Configuration is loaded from `~/.cardbridge/config.json` with environment
//! variable overrides. Persistence back to the host goes through the
//! [`ConfigStore`] trait so embedding runtimes can supply their own storage.

mod store;
mod types;

pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the CardBridge configuration directory path (~/.cardbridge)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cardbridge")
    }

    /// Returns the path to the config file (~/.cardbridge/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Ok(Self::read_from_path(path)?.with_env_overrides())
    }

    /// Read the file as stored, without environment overrides.
    ///
    /// This is the object persistence round-trips; a missing file reads as
    /// the default configuration.
    pub fn read_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The runtime view: this configuration with environment overrides applied.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env_overrides();
        self
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: CARDBRIDGE_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CARDBRIDGE_GITHUB_USERNAME") {
            self.github.username = val;
        }
        if let Ok(val) = std::env::var("CARDBRIDGE_GITHUB_TOKEN") {
            self.github.token = val;
        }
        if let Ok(val) = std::env::var("CARDBRIDGE_GITHUB_REFRESH_INTERVAL_SECONDS") {
            if let Ok(v) = val.parse() {
                self.github.refresh_interval_seconds = v;
            }
        }

        if let Ok(val) = std::env::var("CARDBRIDGE_VENDOR_DIR") {
            self.vendor.dir = val;
        }
        if let Ok(val) = std::env::var("CARDBRIDGE_VENDOR_PACKAGE_URL") {
            self.vendor.package_url = Some(val);
        }
        if let Ok(val) = std::env::var("CARDBRIDGE_VENDOR_PACKAGE_SHA256") {
            self.vendor.package_sha256 = Some(val);
        }

        if let Ok(val) = std::env::var("CARDBRIDGE_DELIVERY_WEBHOOK_URL") {
            self.delivery.webhook_url = Some(val);
        }

        if let Ok(val) = std::env::var("CARDBRIDGE_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the expanded vendor root (resolves ~ to home directory)
    pub fn vendor_root(&self) -> PathBuf {
        expand_home(&self.vendor.dir)
    }

    /// A copy safe to print: the token is masked.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        copy.github.token = mask_secret(&copy.github.token);
        copy
    }
}

/// Mask all but the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Resolve a leading `~` or `~/` against the home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(path),
    };
    match path.strip_prefix('~') {
        Some("") => home,
        Some(rest) => match rest.strip_prefix('/') {
            Some(relative) => home.join(relative),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
