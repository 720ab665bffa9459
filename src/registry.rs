//! Subscriber registry: the set of destinations that receive new cards.
//!
//! Every mutation is persisted through the host [`ConfigStore`] and then
//! re-projected so the vendored tool's config stays in step.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::{Config, ConfigStore};
use crate::error::{BridgeError, Result};
use crate::projector::ConfigProjector;

/// Conversation type encoded in a destination identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Group,
    Direct,
    Unknown,
}

impl DestinationKind {
    /// Classify identifiers of the form `platform:MessageType:id`.
    pub fn classify(destination: &str) -> Self {
        let message_type = destination.split(':').nth(1).unwrap_or("");
        match message_type {
            "GroupMessage" => DestinationKind::Group,
            "FriendMessage" | "PrivateMessage" => DestinationKind::Direct,
            _ => DestinationKind::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DestinationKind::Group => "group",
            DestinationKind::Direct => "direct",
            DestinationKind::Unknown => "unknown",
        }
    }
}

/// A registered destination with its derived label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub destination: String,
    pub kind: DestinationKind,
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.destination)
    }
}

/// Outcome of a subscribe or unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// The set already had the requested shape; nothing was saved.
    Unchanged,
    /// Saved and re-projected.
    Applied,
    /// Saved and in effect, but the vendored config was not refreshed.
    Unprojected(String),
}

impl Mutation {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Mutation::Unchanged)
    }
}

pub struct SubscriberRegistry {
    destinations: Mutex<Vec<String>>,
    store: Arc<dyn ConfigStore>,
    projector: ConfigProjector,
}

impl SubscriberRegistry {
    /// Build from the persisted list; duplicates and blanks are dropped.
    pub fn new(initial: Vec<String>, store: Arc<dyn ConfigStore>, projector: ConfigProjector) -> Self {
        let mut destinations: Vec<String> = Vec::with_capacity(initial.len());
        for dest in initial {
            let dest = dest.trim().to_string();
            if !dest.is_empty() && !destinations.contains(&dest) {
                destinations.push(dest);
            }
        }
        Self {
            destinations: Mutex::new(destinations),
            store,
            projector,
        }
    }

    /// Add `destination`. Returns [`Mutation::Unchanged`] when it was
    /// already present.
    pub fn subscribe(&self, destination: &str) -> Result<Mutation> {
        let destination = normalize(destination)?;
        let mut current = self.lock()?;
        if current.iter().any(|d| d == &destination) {
            info!(destination = %destination, "Destination already subscribed");
            return Ok(Mutation::Unchanged);
        }

        let mut next = current.clone();
        next.push(destination.clone());
        let saved = self.save(&next)?;
        *current = next;
        info!(destination = %destination, total = current.len(), "Destination subscribed");
        Ok(self.project(&saved))
    }

    /// Remove `destination`. Returns [`Mutation::Unchanged`] when it was not
    /// present.
    pub fn unsubscribe(&self, destination: &str) -> Result<Mutation> {
        let destination = normalize(destination)?;
        let mut current = self.lock()?;
        if !current.iter().any(|d| d == &destination) {
            info!(destination = %destination, "Destination was not subscribed");
            return Ok(Mutation::Unchanged);
        }

        let next: Vec<String> = current.iter().filter(|d| **d != destination).cloned().collect();
        let saved = self.save(&next)?;
        *current = next;
        info!(destination = %destination, total = current.len(), "Destination unsubscribed");
        Ok(self.project(&saved))
    }

    pub fn list(&self) -> Vec<Subscriber> {
        self.destinations()
            .into_iter()
            .map(|destination| Subscriber {
                kind: DestinationKind::classify(&destination),
                destination,
            })
            .collect()
    }

    /// Snapshot of the raw destination identifiers.
    pub fn destinations(&self) -> Vec<String> {
        match self.destinations.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.destinations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<String>>> {
        self.destinations
            .lock()
            .map_err(|_| BridgeError::Config("subscriber registry lock poisoned".to_string()))
    }

    fn save(&self, destinations: &[String]) -> Result<Config> {
        self.store.update(&mut |config: &mut Config| {
            config.github.notification_targets = destinations.to_vec();
        })
    }

    /// The store holds the file as written; the projection needs the
    /// runtime view.
    fn project(&self, saved: &Config) -> Mutation {
        let effective = saved.clone().with_env_overrides();
        match self.projector.write(&effective.github) {
            Ok(_) => Mutation::Applied,
            Err(e) => {
                warn!("Destinations saved but vendored config not refreshed: {}", e);
                Mutation::Unprojected(e.to_string())
            }
        }
    }
}

fn normalize(destination: &str) -> Result<String> {
    let trimmed = destination.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::Config("destination must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::vendor::VendorLayout;

    fn registry(initial: &[&str]) -> (tempfile::TempDir, Arc<MemoryConfigStore>, SubscriberRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConfigStore::new(Config::default()));
        let projector = ConfigProjector::new(&VendorLayout::new(dir.path()));
        let registry = SubscriberRegistry::new(
            initial.iter().map(|s| s.to_string()).collect(),
            store.clone(),
            projector,
        );
        (dir, store, registry)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let (_dir, store, registry) = registry(&[]);

        assert_eq!(registry.subscribe("qq:GroupMessage:1").unwrap(), Mutation::Applied);
        assert_eq!(registry.subscribe("qq:GroupMessage:1").unwrap(), Mutation::Unchanged);
        assert_eq!(registry.subscribe("  qq:GroupMessage:1 ").unwrap(), Mutation::Unchanged);

        assert_eq!(registry.len(), 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(
            store.load().unwrap().github.notification_targets,
            vec!["qq:GroupMessage:1"]
        );
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let (_dir, store, registry) = registry(&["qq:FriendMessage:7"]);

        assert!(!registry.unsubscribe("qq:GroupMessage:1").unwrap().is_applied());
        assert_eq!(registry.len(), 1);
        assert_eq!(store.save_count(), 0);

        assert!(registry.unsubscribe("qq:FriendMessage:7").unwrap().is_applied());
        assert!(registry.is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_mutation_reprojects_vendored_config() {
        let (dir, _store, registry) = registry(&[]);
        registry.subscribe("qq:GroupMessage:1").unwrap();
        assert!(VendorLayout::new(dir.path()).config_file().exists());
    }

    #[test]
    fn test_projection_failure_still_commits() {
        let dir = tempfile::tempdir().unwrap();
        let vendor_root = dir.path().join("not-a-dir");
        std::fs::write(&vendor_root, b"plain file").unwrap();
        let store = Arc::new(MemoryConfigStore::new(Config::default()));
        let registry = SubscriberRegistry::new(
            Vec::new(),
            store.clone(),
            ConfigProjector::new(&VendorLayout::new(&vendor_root)),
        );

        let outcome = registry.subscribe("qq:GroupMessage:1").unwrap();

        assert!(matches!(outcome, Mutation::Unprojected(_)));
        assert_eq!(registry.destinations(), vec!["qq:GroupMessage:1"]);
        assert_eq!(
            store.load().unwrap().github.notification_targets,
            vec!["qq:GroupMessage:1"]
        );

        assert!(registry.unsubscribe("qq:GroupMessage:1").unwrap().is_applied());
        assert!(registry.is_empty());
        assert!(store.load().unwrap().github.notification_targets.is_empty());
    }

    #[test]
    fn test_initial_list_deduplicated() {
        let (_dir, _store, registry) = registry(&["a:GroupMessage:1", "a:GroupMessage:1", " ", "b"]);
        assert_eq!(registry.destinations(), vec!["a:GroupMessage:1", "b"]);
    }

    #[test]
    fn test_list_labels() {
        let (_dir, _store, registry) =
            registry(&["qq:GroupMessage:1", "qq:FriendMessage:2", "tg:PrivateMessage:3", "raw"]);
        let kinds: Vec<DestinationKind> = registry.list().into_iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DestinationKind::Group,
                DestinationKind::Direct,
                DestinationKind::Direct,
                DestinationKind::Unknown
            ]
        );
        assert_eq!(registry.list()[0].to_string(), "[group] qq:GroupMessage:1");
    }

    #[test]
    fn test_empty_destination_rejected() {
        let (_dir, _store, registry) = registry(&[]);
        assert!(matches!(registry.subscribe("  "), Err(BridgeError::Config(_))));
    }
}
