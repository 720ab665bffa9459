//! Validate a new artifact and fan it out to every destination.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::notifier::Notifier;
use crate::registry::SubscriberRegistry;

/// Aggregate result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: usize,
    pub total: usize,
    /// `(destination, reason)` for each failed delivery.
    pub failures: Vec<(String, String)>,
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} succeeded", self.succeeded, self.total)
    }
}

/// What happened to a candidate artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The file vanished before it could be read.
    Missing,
    /// Still empty after the grace period; dropped.
    NotReady,
    /// Valid, but nobody is subscribed.
    NoDestinations,
    Delivered(DispatchReport),
}

/// Delivery counters for one destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    registry: Arc<SubscriberRegistry>,
    message: String,
    write_grace: Duration,
    stats: Mutex<HashMap<String, DeliveryStats>>,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        registry: Arc<SubscriberRegistry>,
        message: impl Into<String>,
        write_grace: Duration,
    ) -> Self {
        Self {
            notifier,
            registry,
            message: message.into(),
            write_grace,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Full pipeline for a freshly detected artifact.
    pub async fn dispatch(&self, path: &Path) -> DispatchOutcome {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "Artifact disappeared before dispatch");
            return DispatchOutcome::Missing;
        }

        // Stand-in for a write-completion signal from the producer.
        tokio::time::sleep(self.write_grace).await;

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                warn!(path = %path.display(), "Artifact still empty after grace period, dropping");
                return DispatchOutcome::NotReady;
            }
            Err(e) => {
                warn!(path = %path.display(), "Artifact unreadable after grace period: {}", e);
                return DispatchOutcome::Missing;
            }
        }

        self.deliver(path).await
    }

    /// Send an already-validated artifact to every current destination.
    pub async fn deliver(&self, path: &Path) -> DispatchOutcome {
        let destinations = self.registry.destinations();
        if destinations.is_empty() {
            info!(path = %path.display(), "No destinations subscribed, card not sent");
            return DispatchOutcome::NoDestinations;
        }
        DispatchOutcome::Delivered(self.fan_out(&destinations, path).await)
    }

    async fn fan_out(&self, destinations: &[String], path: &Path) -> DispatchReport {
        let sends = destinations.iter().map(|dest| async move {
            let result = self.notifier.send_image(dest, &self.message, path).await;
            (dest.clone(), result)
        });
        let results = join_all(sends).await;

        let mut report = DispatchReport {
            total: results.len(),
            ..DispatchReport::default()
        };
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        for (dest, result) in results {
            let entry = stats.entry(dest.clone()).or_default();
            match result {
                Ok(()) => {
                    debug!(destination = %dest, "Card delivered");
                    entry.sent += 1;
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(destination = %dest, "Card delivery failed: {}", e);
                    entry.failed += 1;
                    report.failures.push((dest, e.to_string()));
                }
            }
        }

        info!(path = %path.display(), "Card dispatch: {}", report);
        report
    }

    /// Per-destination counters, sorted by destination.
    pub fn stats(&self) -> Vec<(String, DeliveryStats)> {
        let stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        let mut rows: Vec<(String, DeliveryStats)> =
            stats.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}
