//! Periodic repository polling.
//!
//! Each cycle asks the card generator to `check` every configured repository,
//! one at a time with a fixed spacing, then sleeps out the rest of the
//! interval. Cancellation is observed before each repository and during
//! sleeps; a check that is already running always completes.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::projector::RepositoryTarget;
use crate::supervisor::RepositoryChecker;

/// Repository list shared with the projector; replaced on re-projection.
pub type SharedTargets = Arc<RwLock<Vec<RepositoryTarget>>>;

/// Counters of the current scheduler run. Reset only by a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerCounters {
    pub checks: u64,
    pub errors: u64,
    pub cycles: u64,
    pub last_check: Option<DateTime<Utc>>,
}

struct ActiveLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PollScheduler {
    checker: Arc<dyn RepositoryChecker>,
    targets: SharedTargets,
    interval: Duration,
    spacing: Duration,
    counters: Arc<Mutex<SchedulerCounters>>,
    active: Option<ActiveLoop>,
}

impl PollScheduler {
    pub fn new(
        checker: Arc<dyn RepositoryChecker>,
        targets: SharedTargets,
        interval: Duration,
        spacing: Duration,
    ) -> Self {
        Self {
            checker,
            targets,
            interval,
            spacing,
            counters: Arc::new(Mutex::new(SchedulerCounters::default())),
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    pub fn counters(&self) -> SchedulerCounters {
        lock(&self.counters).clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the loop. Returns `false` when one is already active.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!("Poll scheduler already running");
            return false;
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.checker),
            Arc::clone(&self.targets),
            self.interval,
            self.spacing,
            Arc::clone(&self.counters),
            cancel_rx,
        ));
        info!(
            interval_secs = self.interval.as_secs(),
            spacing_secs = self.spacing.as_secs(),
            "Poll scheduler started"
        );
        self.active = Some(ActiveLoop { cancel, handle });
        true
    }

    /// Signal cancellation and wait for the loop to exit. An in-flight
    /// check finishes first. Returns `false` when nothing was running.
    pub async fn stop(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let _ = active.cancel.send(true);
        if let Err(e) = active.handle.await {
            if !e.is_cancelled() {
                warn!("Poll scheduler task ended abnormally: {}", e);
            }
        }
        info!("Poll scheduler stopped");
        true
    }

    /// Cancel, reset all counters and start fresh.
    pub async fn restart(&mut self) {
        self.stop().await;
        *lock(&self.counters) = SchedulerCounters::default();
        self.start();
    }
}

fn lock(counters: &Mutex<SchedulerCounters>) -> std::sync::MutexGuard<'_, SchedulerCounters> {
    counters.lock().unwrap_or_else(|p| p.into_inner())
}

/// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    let cancelled = tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.wait_for(|c| *c) => true,
    };
    cancelled || *cancel.borrow()
}

async fn run_loop(
    checker: Arc<dyn RepositoryChecker>,
    targets: SharedTargets,
    interval: Duration,
    spacing: Duration,
    counters: Arc<Mutex<SchedulerCounters>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        let cycle_start = Instant::now();

        let snapshot: Vec<RepositoryTarget> = targets
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
            .into_iter()
            .filter(RepositoryTarget::is_checkable)
            .collect();
        debug!(repositories = snapshot.len(), "Polling cycle started");

        for (index, target) in snapshot.iter().enumerate() {
            if index > 0 && sleep_or_cancel(spacing, &mut cancel).await {
                return;
            }
            if *cancel.borrow() {
                return;
            }

            let result = checker.check_repository(target).await;
            let mut c = lock(&counters);
            c.checks += 1;
            c.last_check = Some(Utc::now());
            match result {
                Ok(out) => debug!(repository = %target, output = %out.text(), "Repository checked"),
                Err(e) => {
                    c.errors += 1;
                    warn!(repository = %target, "Repository check failed: {}", e);
                }
            }
        }
        lock(&counters).cycles += 1;

        let remaining = interval.saturating_sub(cycle_start.elapsed());
        if sleep_or_cancel(remaining, &mut cancel).await {
            break;
        }
    }
}
