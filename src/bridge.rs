//! Owned application context.
//!
//! `CardBridge` holds every component for one host installation: the
//! bootstrapped vendor state, the projector, subscriber registry, dispatcher,
//! process supervisor, poll scheduler and artifact watcher. Nothing is global.
//! Command methods return a [`CommandReply`] with an explicit reason string
//! instead of failing, so a host can relay them verbatim.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, ConfigStore, MonitorConfig};
use crate::dispatch::{DispatchOutcome, Dispatcher, Notifier};
use crate::log_component;
use crate::projector::{decode_repositories, ConfigProjector, RepositoryTarget};
use crate::registry::{Mutation, SubscriberRegistry};
use crate::scheduler::{PollScheduler, SharedTargets};
use crate::supervisor::{ProcessSupervisor, RepositoryChecker, StartOutcome, StopOutcome};
use crate::vendor::{Bootstrapper, PackageFetcher, PackageSpec, Platform, VendorLayout, VendorState};
use crate::watcher::{latest_artifact, ArtifactWatcher};

/// Result of a command-style operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub ok: bool,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collaborators supplied by the host.
#[derive(Clone)]
pub struct BridgeDeps {
    pub store: Arc<dyn ConfigStore>,
    pub notifier: Arc<dyn Notifier>,
    pub fetcher: Arc<dyn PackageFetcher>,
    pub platform: Platform,
}

pub struct CardBridge {
    store: Arc<dyn ConfigStore>,
    monitor: MonitorConfig,
    platform: Platform,
    fallback_config: Config,
    vendor: VendorState,
    projector: ConfigProjector,
    targets: SharedTargets,
    registry: Arc<SubscriberRegistry>,
    dispatcher: Arc<Dispatcher>,
    supervisor: Option<Arc<ProcessSupervisor>>,
    scheduler: Mutex<Option<PollScheduler>>,
    watcher: Mutex<Option<ArtifactWatcher>>,
}

impl CardBridge {
    /// Bootstrap, project, then start monitoring when configured to.
    ///
    /// Bootstrap always completes (ready or not) before the projection is
    /// written, and the projection completes before anything is started.
    pub async fn initialize(deps: BridgeDeps, config: Config) -> Self {
        let layout = VendorLayout::new(config.vendor_root());
        info!(component = "bridge", root = %layout.root().display(), "Initializing");

        let vendor = Bootstrapper::new(
            layout.clone(),
            deps.platform.clone(),
            config.vendor.clone(),
            Arc::clone(&deps.fetcher),
        )
        .run()
        .await;

        let bridge = Self::assemble(deps, config, vendor);
        if bridge.vendor.root().exists() {
            bridge.project_current();
        } else {
            warn!(root = %bridge.vendor.root().display(), "Vendor directory missing, vendored config not written");
        }

        if bridge.monitor.autostart && bridge.vendor.is_ready() {
            let reply = bridge.start_monitor().await;
            if !reply.ok {
                warn!("Monitor autostart failed: {}", reply);
            }
        }

        if bridge.vendor.is_ready() {
            log_component!(info, "bridge", "Initialization complete");
        } else {
            log_component!(
                warn,
                "bridge",
                "Initialization finished without a usable card generator",
                reason = bridge.vendor.failure().unwrap_or("unknown")
            );
        }
        bridge
    }

    /// Build from the filesystem alone: no download, no projection write,
    /// nothing started. Used for one-off commands.
    pub fn probe(deps: BridgeDeps, config: Config) -> Self {
        let layout = VendorLayout::new(config.vendor_root());
        let vendor = Bootstrapper::new(
            layout,
            deps.platform.clone(),
            config.vendor.clone(),
            Arc::clone(&deps.fetcher),
        )
        .probe();
        Self::assemble(deps, config, vendor)
    }

    fn assemble(deps: BridgeDeps, config: Config, vendor: VendorState) -> Self {
        let projector = ConfigProjector::new(vendor.layout());
        let targets: SharedTargets = Arc::new(RwLock::new(decode_repositories(
            config.github.repository.as_ref(),
        )));
        let registry = Arc::new(SubscriberRegistry::new(
            config.github.notification_targets.clone(),
            Arc::clone(&deps.store),
            projector.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            deps.notifier,
            Arc::clone(&registry),
            config.delivery.message.clone(),
            Duration::from_secs(config.monitor.write_grace_secs),
        ));

        let stop_timeout = Duration::from_secs(config.monitor.stop_timeout_secs);
        let supervisor = ProcessSupervisor::from_state(&vendor, stop_timeout)
            .ok()
            .map(Arc::new);
        let scheduler = supervisor.as_ref().map(|sup| {
            PollScheduler::new(
                Arc::clone(sup) as Arc<dyn RepositoryChecker>,
                Arc::clone(&targets),
                Duration::from_secs(config.github.refresh_interval_seconds),
                Duration::from_secs(config.monitor.repo_spacing_secs),
            )
        });

        Self {
            store: deps.store,
            monitor: config.monitor.clone(),
            platform: deps.platform,
            fallback_config: config,
            vendor,
            projector,
            targets,
            registry,
            dispatcher,
            supervisor,
            scheduler: Mutex::new(scheduler),
            watcher: Mutex::new(None),
        }
    }

    pub fn vendor(&self) -> &VendorState {
        &self.vendor
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Repositories the scheduler polls, as last projected.
    pub fn repositories(&self) -> Vec<RepositoryTarget> {
        self.targets
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    fn current_config(&self) -> Config {
        self.store.load_effective().unwrap_or_else(|e| {
            warn!("Config store unavailable, using startup config: {}", e);
            self.fallback_config.clone()
        })
    }

    /// Write the vendored config from the current host config and refresh
    /// the scheduler's repository list.
    pub fn project_current(&self) -> bool {
        let config = self.current_config();
        match self.projector.write(&config.github) {
            Ok(projected) => {
                if let Ok(mut targets) = self.targets.write() {
                    *targets = projected.github.repository;
                }
                true
            }
            Err(e) => {
                warn!("Failed to write vendored config: {}", e);
                false
            }
        }
    }

    fn supervisor(&self) -> Result<&Arc<ProcessSupervisor>, CommandReply> {
        self.supervisor.as_ref().ok_or_else(|| {
            CommandReply::fail(format!(
                "Card generator is not ready: {}",
                self.vendor.failure().unwrap_or("bootstrap has not completed")
            ))
        })
    }

    // ------------------------------------------------------------------
    // Monitor lifecycle
    // ------------------------------------------------------------------

    pub async fn start_monitor(&self) -> CommandReply {
        let sup = match self.supervisor() {
            Ok(sup) => Arc::clone(sup),
            Err(reply) => return reply,
        };

        let watcher_started = match self.start_watcher().await {
            Ok(started) => started,
            Err(reply) => return reply,
        };

        let scheduler_started = match self.scheduler.lock().await.as_mut() {
            Some(sched) => sched.start(),
            None => false,
        };

        let mut notes = Vec::new();
        if self.monitor.persistent_process {
            match sup.start_long_running(&self.monitor.persistent_args).await {
                Ok(StartOutcome::Started { pid }) => notes.push(format!("process started (pid {})", pid)),
                Ok(StartOutcome::AlreadyRunning { pid }) => {
                    notes.push(format!("process already running (pid {})", pid))
                }
                Err(e) => return CommandReply::fail(format!("Failed to start process: {}", e)),
            }
        }

        let headline = if watcher_started || scheduler_started {
            log_component!(info, "bridge", "Monitor started");
            "Monitor started"
        } else {
            "Monitor already running"
        };
        if notes.is_empty() {
            CommandReply::ok(headline)
        } else {
            CommandReply::ok(format!("{}; {}", headline, notes.join("; ")))
        }
    }

    async fn start_watcher(&self) -> Result<bool, CommandReply> {
        let mut slot = self.watcher.lock().await;
        if slot.as_ref().is_some_and(|w| w.is_running()) {
            return Ok(false);
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let watcher = ArtifactWatcher::spawn(
            &self.vendor.layout().style_dir(),
            &self.monitor.artifact_extension,
            Duration::from_secs(self.monitor.debounce_secs),
            move |event| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher.dispatch(&event.path).await;
                });
            },
        )
        .map_err(|e| CommandReply::fail(format!("Failed to watch for cards: {}", e)))?;
        *slot = Some(watcher);
        Ok(true)
    }

    pub async fn stop_monitor(&self) -> CommandReply {
        let mut stopped = false;

        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.stop();
            stopped = true;
        }
        if let Some(sched) = self.scheduler.lock().await.as_mut() {
            stopped |= sched.stop().await;
        }

        let mut notes = Vec::new();
        if let Some(sup) = &self.supervisor {
            match sup.stop().await {
                Ok(StopOutcome::NotRunning) => {}
                Ok(StopOutcome::Terminated) => notes.push("process terminated"),
                Ok(StopOutcome::Killed) => notes.push("process killed after timeout"),
                Err(e) => return CommandReply::fail(format!("Failed to stop process: {}", e)),
            }
        }
        stopped |= !notes.is_empty();

        if !stopped {
            return CommandReply::ok("Monitor is not running");
        }
        log_component!(info, "bridge", "Monitor stopped");
        if notes.is_empty() {
            CommandReply::ok("Monitor stopped")
        } else {
            CommandReply::ok(format!("Monitor stopped; {}", notes.join("; ")))
        }
    }

    /// Stop everything, reset scheduler counters and start again.
    pub async fn restart_monitor(&self) -> CommandReply {
        if let Err(reply) = self.supervisor() {
            return reply;
        }
        let stopped = self.stop_monitor().await;
        if !stopped.ok {
            return stopped;
        }
        if let Some(sched) = self.scheduler.lock().await.as_mut() {
            sched.restart().await;
        }
        let started = self.start_monitor().await;
        if started.ok {
            CommandReply::ok("Monitor restarted, counters reset")
        } else {
            started
        }
    }

    /// Stop background work before the host unloads the bridge.
    pub async fn shutdown(&self) {
        let reply = self.stop_monitor().await;
        info!(component = "bridge", detail = %reply, "Shut down");
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn status(&self) -> CommandReply {
        let mut lines = Vec::new();

        match self.vendor.executable() {
            Some(exe) if exe.exists() => {
                lines.push(format!("Card generator: ready\n  path: {}", exe.display()))
            }
            _ => {
                let expected = PackageSpec::resolve(&self.platform, &self.fallback_config.vendor)
                    .map(|spec| spec.executable.display().to_string())
                    .unwrap_or_else(|_| "<unsupported platform>".to_string());
                lines.push(format!(
                    "Card generator: not ready (expected {} in {})",
                    expected,
                    self.vendor.root().display()
                ));
                if let Some(reason) = self.vendor.failure() {
                    lines.push(format!("  reason: {}", reason));
                }
            }
        }

        match self.projector.read() {
            Ok(Some(projected)) => {
                lines.push(format!(
                    "Vendored config: present\n  path: {}",
                    self.projector.path().display()
                ));
                let username = if projected.github.username.is_empty() {
                    "<not set>"
                } else {
                    projected.github.username.as_str()
                };
                lines.push(format!("  GitHub username: {}", username));
                lines.push(format!("  repositories: {}", projected.github.repository.len()));
            }
            Ok(None) => lines.push(format!(
                "Vendored config: missing\n  expected: {}",
                self.projector.path().display()
            )),
            Err(e) => lines.push(format!("Vendored config: unreadable ({})", e)),
        }

        let root = self.vendor.root();
        lines.push(format!(
            "Vendor directory: {} ({})",
            root.display(),
            if root.exists() { "exists" } else { "missing" }
        ));

        let watching = self
            .watcher
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| w.is_running());
        match self.scheduler.lock().await.as_ref() {
            Some(sched) => {
                let c = sched.counters();
                lines.push(format!(
                    "Monitor: {} (watcher {})\n  checks: {}, errors: {}, cycles: {}\n  last check: {}\n  interval: {}s",
                    if sched.is_running() { "running" } else { "stopped" },
                    if watching { "on" } else { "off" },
                    c.checks,
                    c.errors,
                    c.cycles,
                    c.last_check
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                    sched.interval().as_secs()
                ));
            }
            None => lines.push("Monitor: unavailable".to_string()),
        }

        if let Some(sup) = &self.supervisor {
            match sup.running_pid().await {
                Some(pid) => lines.push(format!("Persistent process: running (pid {})", pid)),
                None => lines.push("Persistent process: not running".to_string()),
            }
        }

        lines.push(format!("Destinations: {}", self.registry.len()));
        for (dest, stats) in self.dispatcher.stats() {
            lines.push(format!("  {}: {} sent, {} failed", dest, stats.sent, stats.failed));
        }

        CommandReply {
            ok: self.vendor.is_ready(),
            message: lines.join("\n"),
        }
    }

    /// Host settings as JSON with the token masked.
    pub fn show_config(&self) -> CommandReply {
        let config = self.current_config().redacted();
        match serde_json::to_string_pretty(&config) {
            Ok(json) => CommandReply::ok(json),
            Err(e) => CommandReply::fail(format!("Failed to render config: {}", e)),
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Send the newest generated card to every destination.
    pub async fn test_notification(&self) -> CommandReply {
        let style = self.vendor.layout().style_dir();
        let Some(card) = latest_artifact(&style, &self.monitor.artifact_extension) else {
            return CommandReply::fail(format!("No generated cards found in {}", style.display()));
        };
        info!(card = %card.display(), "Sending test notification");

        match self.dispatcher.deliver(&card).await {
            DispatchOutcome::Delivered(report) => {
                let mut message = format!("Test notification: {}", report);
                for (dest, reason) in &report.failures {
                    message.push_str(&format!("\n  {}: {}", dest, reason));
                }
                CommandReply {
                    ok: report.succeeded == report.total,
                    message,
                }
            }
            DispatchOutcome::NoDestinations => {
                CommandReply::fail("No destinations subscribed; use subscribe first")
            }
            other => CommandReply::fail(format!("Card could not be sent: {:?}", other)),
        }
    }

    pub fn list_subscribers(&self) -> CommandReply {
        let subscribers = self.registry.list();
        if subscribers.is_empty() {
            return CommandReply::ok("No destinations subscribed");
        }
        let mut lines = vec![format!("{} destination(s):", subscribers.len())];
        lines.extend(subscribers.iter().map(|s| format!("  {}", s)));
        CommandReply::ok(lines.join("\n"))
    }

    pub fn subscribe(&self, destination: &str) -> CommandReply {
        match self.registry.subscribe(destination) {
            Ok(Mutation::Unchanged) => {
                CommandReply::ok(format!("{} is already subscribed", destination.trim()))
            }
            Ok(change) => CommandReply::ok(with_projection_warning(
                format!("Subscribed {}", destination.trim()),
                &change,
            )),
            Err(e) => CommandReply::fail(format!("Subscribe failed: {}", e)),
        }
    }

    pub fn unsubscribe(&self, destination: &str) -> CommandReply {
        match self.registry.unsubscribe(destination) {
            Ok(Mutation::Unchanged) => {
                CommandReply::ok(format!("{} was not subscribed", destination.trim()))
            }
            Ok(change) => CommandReply::ok(with_projection_warning(
                format!("Unsubscribed {}", destination.trim()),
                &change,
            )),
            Err(e) => CommandReply::fail(format!("Unsubscribe failed: {}", e)),
        }
    }

    // ------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------

    pub async fn list_repositories(&self) -> CommandReply {
        let sup = match self.supervisor() {
            Ok(sup) => sup,
            Err(reply) => return reply,
        };
        match sup.list().await {
            Ok(out) => CommandReply::ok(non_empty(out.text(), "No repositories reported")),
            Err(e) => CommandReply::fail(format!("list failed: {}", e)),
        }
    }

    pub async fn check_repository(&self, owner: &str, repo: &str) -> CommandReply {
        let sup = match self.supervisor() {
            Ok(sup) => sup,
            Err(reply) => return reply,
        };
        match sup.check(owner, repo).await {
            Ok(out) => CommandReply::ok(non_empty(
                out.text(),
                &format!("Checked {}/{}", owner, repo),
            )),
            Err(e) => CommandReply::fail(format!("check {}/{} failed: {}", owner, repo, e)),
        }
    }

    /// Register a repository with the card generator, then record it in the
    /// host config and re-project.
    pub async fn add_repository(&self, owner: &str, repo: &str, branch: &str) -> CommandReply {
        let sup = match self.supervisor() {
            Ok(sup) => sup,
            Err(reply) => return reply,
        };
        let output = match sup.add(owner, repo, branch).await {
            Ok(out) => out,
            Err(e) => return CommandReply::fail(format!("add {}/{} failed: {}", owner, repo, e)),
        };

        let target = RepositoryTarget::new(owner, repo, branch);
        let mut added = false;
        let saved = self.store.update(&mut |config: &mut Config| {
            added = append_repository(&mut config.github.repository, &target);
        });
        if let Err(e) = saved {
            return CommandReply::fail(format!(
                "{}/{} added to the card generator but not saved: {}",
                owner, repo, e
            ));
        }
        let projected = self.project_current();

        let mut message = if added {
            format!("Added {}", target)
        } else {
            format!("{}/{} was already configured", owner, repo)
        };
        if !projected {
            message.push_str("\nWarning: saved, but the vendored config was not refreshed");
        }
        let text = output.text();
        if !text.is_empty() {
            message.push('\n');
            message.push_str(&text);
        }
        CommandReply::ok(message)
    }
}

fn with_projection_warning(mut message: String, change: &Mutation) -> String {
    if let Mutation::Unprojected(reason) = change {
        message.push_str(&format!(
            "\nWarning: saved, but the vendored config was not refreshed: {}",
            reason
        ));
    }
    message
}

/// Append `target` to a raw repository list unless the same owner/repo is
/// already present. A missing or non-list value is replaced by a new list.
fn append_repository(raw: &mut Option<Value>, target: &RepositoryTarget) -> bool {
    let entry = match serde_json::to_value(target) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match raw {
        Some(Value::Array(items)) => {
            let existing = decode_repositories(Some(&Value::Array(items.clone())));
            if existing.iter().any(|t| t.same_repository(target)) {
                return false;
            }
            items.push(entry);
        }
        _ => *raw = Some(Value::Array(vec![entry])),
    }
    true
}

fn non_empty(text: String, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
