//! Artifact watcher for the generated-image directory.
//!
//! The notify callback runs on the watcher's own thread. It only filters
//! events and pushes paths into an unbounded channel; a tokio task debounces
//! them and hands each surviving [`ArtifactEvent`] to the handler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

/// Entries kept before stale paths are pruned from the debounce table.
const DEBOUNCE_PRUNE_THRESHOLD: usize = 256;

/// A newly created artifact, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

/// Per-path suppression of repeated notifications.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emitted: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// True when `path` has not been emitted within the window before `now`.
    /// Emitting records `now` as the path's last notification.
    pub fn should_emit(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(last) = self.last_emitted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        if self.last_emitted.len() >= DEBOUNCE_PRUNE_THRESHOLD {
            let window = self.window;
            self.last_emitted
                .retain(|_, last| now.saturating_duration_since(*last) < window);
        }
        self.last_emitted.insert(path.to_path_buf(), now);
        true
    }
}

/// Whether `path` carries the artifact extension (case-insensitive).
pub fn is_artifact(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Most recently modified artifact under `dir`, searched recursively.
pub fn latest_artifact(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                pending.push(path);
            } else if is_artifact(&path, extension) {
                let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                    newest = Some((modified, path));
                }
            }
        }
    }
    newest.map(|(_, path)| path)
}

/// Paths of `event` that count as a newly created artifact.
///
/// Creations qualify, and so do renames into the directory so that
/// write-then-rename producers are observed.
fn created_paths(event: &Event, extension: &str) -> Vec<PathBuf> {
    let candidates: Vec<&PathBuf> = match event.kind {
        EventKind::Create(_) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last().into_iter().collect(),
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|p| is_artifact(p, extension))
        .cloned()
        .collect()
}

/// Drain `rx`, debounce per path, and call `handler` for each survivor.
/// Returns when every sender is dropped.
pub async fn pump<F>(mut rx: mpsc::UnboundedReceiver<PathBuf>, window: Duration, handler: F)
where
    F: Fn(ArtifactEvent) + Send,
{
    let mut debouncer = Debouncer::new(window);
    while let Some(path) = rx.recv().await {
        if debouncer.should_emit(&path, Instant::now()) {
            debug!(path = %path.display(), "Artifact detected");
            handler(ArtifactEvent {
                path,
                detected_at: Utc::now(),
            });
        } else {
            debug!(path = %path.display(), "Duplicate artifact event suppressed");
        }
    }
}

/// A running watch over one directory.
pub struct ArtifactWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
    pump: JoinHandle<()>,
}

impl ArtifactWatcher {
    /// Watch `dir` recursively. `dir` is created when missing.
    pub fn spawn<F>(dir: &Path, extension: &str, window: Duration, handler: F) -> Result<Self>
    where
        F: Fn(ArtifactEvent) + Send + 'static,
    {
        std::fs::create_dir_all(dir).map_err(|e| {
            BridgeError::Filesystem(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let ext = extension.trim_start_matches('.').to_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in created_paths(&event, &ext) {
                    if tx.send(path).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Filesystem watch error: {}", e),
        })?;
        watcher.watch(dir, RecursiveMode::Recursive)?;

        let pump = tokio::spawn(pump(rx, window, handler));
        info!(dir = %dir.display(), extension = extension, "Artifact watcher started");

        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
            pump,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_running(&self) -> bool {
        !self.pump.is_finished()
    }

    /// Stop watching. Dispatches already handed off keep running.
    pub fn stop(self) {
        self.pump.abort();
        info!(dir = %self.dir.display(), "Artifact watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange};
    use std::sync::{Arc, Mutex};

    fn collector() -> (Arc<Mutex<Vec<ArtifactEvent>>>, impl Fn(ArtifactEvent) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: ArtifactEvent| sink.lock().unwrap().push(event))
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_within_window_dispatch_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen, handler) = collector();
        let task = tokio::spawn(pump(rx, Duration::from_secs(5), handler));
        let path = PathBuf::from("/vendor/Style/card.png");

        tx.send(path.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(path.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(path.clone()).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_beyond_window_dispatch_twice() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen, handler) = collector();
        let task = tokio::spawn(pump(rx, Duration::from_secs(5), handler));
        let path = PathBuf::from("/vendor/Style/card.png");

        tx.send(path.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(path.clone()).unwrap();
        drop(tx);
        task.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.path == path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_paths_debounced_independently() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen, handler) = collector();
        let task = tokio::spawn(pump(rx, Duration::from_secs(5), handler));

        tx.send(PathBuf::from("a.png")).unwrap();
        tx.send(PathBuf::from("b.png")).unwrap();
        tx.send(PathBuf::from("a.png")).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_debouncer_window_boundary() {
        let mut debouncer = Debouncer::new(Duration::from_secs(5));
        let t0 = Instant::now();
        let p = Path::new("x.png");
        assert!(debouncer.should_emit(p, t0));
        assert!(!debouncer.should_emit(p, t0 + Duration::from_millis(4999)));
        assert!(debouncer.should_emit(p, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_created_paths_filtering() {
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/s/card.PNG"))
            .add_path(PathBuf::from("/s/notes.txt"));
        assert_eq!(created_paths(&create, "png"), vec![PathBuf::from("/s/card.PNG")]);

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/s/card.tmp"))
            .add_path(PathBuf::from("/s/card.png"));
        assert_eq!(created_paths(&rename, "png"), vec![PathBuf::from("/s/card.png")]);

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/s/card.png"));
        assert!(created_paths(&write, "png").is_empty());
    }

    #[test]
    fn test_latest_artifact_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_artifact(dir.path(), "png").is_none());

        std::fs::create_dir_all(dir.path().join("octo")).unwrap();
        let old = dir.path().join("old.png");
        let new = dir.path().join("octo").join("new.png");
        std::fs::write(&old, b"1").unwrap();
        std::fs::write(&new, b"2").unwrap();
        std::fs::write(dir.path().join("newest.txt"), b"3").unwrap();
        let past = std::time::SystemTime::now() - Duration::from_secs(600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(latest_artifact(dir.path(), "png"), Some(new));
    }

    #[tokio::test]
    async fn test_watcher_observes_new_png() {
        let dir = tempfile::tempdir().unwrap();
        let style = dir.path().join("Style");
        let (seen, handler) = collector();
        let watcher =
            ArtifactWatcher::spawn(&style, "png", Duration::from_secs(5), handler).unwrap();
        assert!(watcher.is_running());

        std::fs::create_dir_all(style.join("octo")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(style.join("ignored.txt"), b"x").unwrap();
        std::fs::write(style.join("octo").join("card.png"), b"png").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].path.ends_with("octo/card.png"));
        watcher.stop();
    }
}
