//! Shared CLI helpers used across multiple command handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use cardbridge::config::{ConfigStore, FileConfigStore};
use cardbridge::dispatch::notifier_from_config;
use cardbridge::vendor::HttpFetcher;
use cardbridge::{BridgeDeps, CommandReply, Config, Platform};

/// Host config plus the file store it came from.
pub(crate) struct Session {
    pub store: Arc<FileConfigStore>,
    pub config: Config,
}

impl Session {
    /// Collaborators for a standalone bridge: file store, HTTP fetcher,
    /// configured notifier and the running platform.
    pub(crate) fn deps(&self) -> Result<BridgeDeps> {
        let fetcher = HttpFetcher::new(Duration::from_secs(
            self.config.vendor.download_timeout_secs,
        ))
        .with_context(|| "Failed to create package fetcher")?;
        let notifier = notifier_from_config(&self.config.delivery)
            .with_context(|| "Failed to create notifier")?;

        Ok(BridgeDeps {
            store: Arc::clone(&self.store) as Arc<dyn ConfigStore>,
            notifier,
            fetcher: Arc::new(fetcher),
            platform: Platform::current(),
        })
    }
}

/// Load the host config from `path`, or from `~/.cardbridge/config.json`.
pub(crate) fn load_session(path: Option<&Path>) -> Result<Session> {
    let store = match path {
        Some(p) => FileConfigStore::new(p),
        None => FileConfigStore::default_location(),
    };
    let config = store
        .load_effective()
        .with_context(|| format!("Failed to load config from {}", store.path().display()))?;
    Ok(Session {
        store: Arc::new(store),
        config,
    })
}

/// Print a command reply; a failed reply becomes a non-zero exit.
pub(crate) fn emit(reply: CommandReply) -> Result<()> {
    if reply.ok {
        println!("{}", reply);
        Ok(())
    } else {
        bail!("{}", reply)
    }
}
