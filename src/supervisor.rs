//! Process supervisor for the vendored card generator.
//!
//! One-shot invocations (`check`, `add`, `list`) run to completion with
//! captured output. An optional long-running monitor process is owned here
//! exclusively; at most one handle exists at a time.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::projector::RepositoryTarget;
use crate::vendor::VendorState;

/// Captured result of a one-shot invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Non-zero exit becomes `ProcessExit` carrying the captured stderr.
    pub fn into_result(self) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(BridgeError::ProcessExit {
                command: self.command,
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Stdout and stderr joined for display.
    pub fn text(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (_, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// Exited within the grace window after the termination signal.
    Terminated,
    /// Did not exit in time and was killed.
    Killed,
}

/// The single long-running child.
struct ManagedProcess {
    pid: u32,
    child: Child,
}

impl ManagedProcess {
    fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }
}

pub struct ProcessSupervisor {
    executable: PathBuf,
    workdir: PathBuf,
    logs_dir: PathBuf,
    stop_timeout: Duration,
    exec_bit_checked: AtomicBool,
    process: Mutex<Option<ManagedProcess>>,
}

impl ProcessSupervisor {
    pub fn new(executable: PathBuf, workdir: PathBuf, stop_timeout: Duration) -> Self {
        let logs_dir = workdir.join("logs");
        Self {
            executable,
            workdir,
            logs_dir,
            stop_timeout,
            exec_bit_checked: AtomicBool::new(false),
            process: Mutex::new(None),
        }
    }

    /// Supervisor for a bootstrapped vendor root.
    pub fn from_state(state: &VendorState, stop_timeout: Duration) -> Result<Self> {
        let exe = state.executable().ok_or(BridgeError::VendorNotReady)?;
        Ok(Self::new(
            exe.to_path_buf(),
            state.root().to_path_buf(),
            stop_timeout,
        ))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Set the executable bit once per supervisor.
    fn ensure_executable(&self) -> Result<()> {
        if self.exec_bit_checked.load(Ordering::Acquire) {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&self.executable).map_err(|e| {
                BridgeError::Process(format!(
                    "cannot stat {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;
            let mode = meta.permissions().mode();
            if mode & 0o111 == 0 {
                std::fs::set_permissions(&self.executable, std::fs::Permissions::from_mode(0o755))
                    .map_err(|e| {
                        BridgeError::Process(format!(
                            "cannot mark {} executable: {}",
                            self.executable.display(),
                            e
                        ))
                    })?;
                info!(path = %self.executable.display(), "Marked card generator executable");
            }
        }

        self.exec_bit_checked.store(true, Ordering::Release);
        Ok(())
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args).current_dir(&self.workdir);
        cmd
    }

    /// Run to completion. A non-zero exit is still `Ok`; see
    /// [`CommandOutput::into_result`].
    pub async fn run_one_shot(&self, args: &[String]) -> Result<CommandOutput> {
        self.ensure_executable()?;
        let command = args.join(" ");
        debug!(command = %command, "Running card generator");

        let output = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BridgeError::Process(format!("failed to run '{}': {}", command, e)))?;

        let result = CommandOutput {
            command,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };
        if !result.success() {
            warn!(command = %result.command, code = ?result.exit_code, "Card generator exited unsuccessfully");
        }
        Ok(result)
    }

    /// `check <owner> <repo>`
    pub async fn check(&self, owner: &str, repo: &str) -> Result<CommandOutput> {
        self.run_one_shot(&["check".to_string(), owner.to_string(), repo.to_string()])
            .await?
            .into_result()
    }

    /// `add <owner> <repo> <branch>`
    pub async fn add(&self, owner: &str, repo: &str, branch: &str) -> Result<CommandOutput> {
        self.run_one_shot(&[
            "add".to_string(),
            owner.to_string(),
            repo.to_string(),
            branch.to_string(),
        ])
        .await?
        .into_result()
    }

    /// `list`
    pub async fn list(&self) -> Result<CommandOutput> {
        self.run_one_shot(&["list".to_string()]).await?.into_result()
    }

    /// Start the long-running process unless one is alive already.
    /// Output goes to `logs/monitor.log` under the vendor root.
    pub async fn start_long_running(&self, args: &[String]) -> Result<StartOutcome> {
        let mut slot = self.process.lock().await;
        if let Some(proc) = slot.as_mut() {
            if proc.is_alive() {
                info!(pid = proc.pid, "Card generator monitor already running");
                return Ok(StartOutcome::AlreadyRunning { pid: proc.pid });
            }
            debug!(pid = proc.pid, "Previous monitor process has exited");
            *slot = None;
        }

        self.ensure_executable()?;
        std::fs::create_dir_all(&self.logs_dir)?;
        let log_path = self.logs_dir.join("monitor.log");
        let log_file = std::fs::File::create(&log_path)?;
        let log_file_err = log_file.try_clone()?;

        let child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()
            .map_err(|e| BridgeError::Process(format!("failed to start monitor: {}", e)))?;

        let pid = child.id().unwrap_or(0);
        info!(pid, log = %log_path.display(), "Card generator monitor started");
        *slot = Some(ManagedProcess { pid, child });
        Ok(StartOutcome::Started { pid })
    }

    /// Terminate the long-running process, escalating to a kill after the
    /// stop timeout.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut slot = self.process.lock().await;
        let Some(mut proc) = slot.take() else {
            debug!("Monitor not running, nothing to stop");
            return Ok(StopOutcome::NotRunning);
        };
        if !proc.is_alive() {
            return Ok(StopOutcome::NotRunning);
        }

        info!(pid = proc.pid, "Stopping card generator monitor");
        request_termination(&mut proc).await;

        match tokio::time::timeout(self.stop_timeout, proc.child.wait()).await {
            Ok(_) => {
                info!(pid = proc.pid, "Monitor exited");
                Ok(StopOutcome::Terminated)
            }
            Err(_) => {
                warn!(
                    pid = proc.pid,
                    timeout_secs = self.stop_timeout.as_secs_f32(),
                    "Monitor ignored termination, killing"
                );
                proc.child.kill().await.map_err(|e| {
                    BridgeError::Process(format!("failed to kill monitor {}: {}", proc.pid, e))
                })?;
                Ok(StopOutcome::Killed)
            }
        }
    }

    /// Pid of the live long-running process, if any.
    pub async fn running_pid(&self) -> Option<u32> {
        let mut slot = self.process.lock().await;
        match slot.as_mut() {
            Some(proc) => proc.is_alive().then_some(proc.pid),
            None => None,
        }
    }
}

#[cfg(unix)]
async fn request_termination(proc: &mut ManagedProcess) {
    let status = Command::new("kill")
        .args(["-TERM", &proc.pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        warn!(pid = proc.pid, "Failed to signal monitor: {}", e);
    }
}

#[cfg(not(unix))]
async fn request_termination(proc: &mut ManagedProcess) {
    if let Err(e) = proc.child.start_kill() {
        warn!(pid = proc.pid, "Failed to signal monitor: {}", e);
    }
}

/// Runs one repository check. The scheduler depends on this seam only.
#[async_trait]
pub trait RepositoryChecker: Send + Sync {
    async fn check_repository(&self, target: &RepositoryTarget) -> Result<CommandOutput>;
}

#[async_trait]
impl RepositoryChecker for ProcessSupervisor {
    async fn check_repository(&self, target: &RepositoryTarget) -> Result<CommandOutput> {
        self.check(&target.owner, &target.repo).await
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::test_support::install_fake;
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn supervisor(dir: &Path, stop_timeout: Duration) -> ProcessSupervisor {
        let exe = install_fake(dir, 0o755);
        ProcessSupervisor::new(exe, dir.to_path_buf(), stop_timeout)
    }

    #[tokio::test]
    async fn test_one_shot_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_secs(5));

        let out = sup.check("octo", "demo").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "checked octo/demo");
        assert_eq!(out.command, "check octo demo");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_secs(5));

        let raw = sup.run_one_shot(&args(&["check", "octo", "broken"])).await.unwrap();
        assert_eq!(raw.exit_code, Some(3));
        assert_eq!(raw.text(), "rate limited");

        match sup.check("octo", "broken").await.unwrap_err() {
            BridgeError::ProcessExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "rate limited");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runs_in_vendor_root() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_secs(5));
        let out = sup.run_one_shot(&args(&["pwd"])).await.unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_exec_bit_set_before_first_run() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = install_fake(dir.path(), 0o644);
        let sup = ProcessSupervisor::new(exe.clone(), dir.path().to_path_buf(), Duration::from_secs(5));

        let out = sup.list().await.unwrap();
        assert_eq!(out.stdout.trim(), "octo/demo");
        let mode = std::fs::metadata(&exe).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_add_passes_branch() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_secs(5));
        let out = sup.add("octo", "demo", "dev").await.unwrap();
        assert_eq!(out.stdout.trim(), "added octo/demo@dev");
    }

    #[tokio::test]
    async fn test_start_twice_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_secs(5));

        let first = sup.start_long_running(&args(&["monitor"])).await.unwrap();
        let StartOutcome::Started { pid } = first else {
            panic!("expected start, got {:?}", first);
        };
        let second = sup.start_long_running(&args(&["monitor"])).await.unwrap();
        assert_eq!(second, StartOutcome::AlreadyRunning { pid });
        assert_eq!(sup.running_pid().await, Some(pid));
        assert!(dir.path().join("logs").join("monitor.log").exists());

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Terminated);
        assert_eq!(sup.running_pid().await, None);
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), Duration::from_millis(500));

        sup.start_long_running(&args(&["stubborn"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Killed);
    }

    #[tokio::test]
    async fn test_from_state_requires_ready_vendor() {
        let state = VendorState::not_ready(crate::vendor::VendorLayout::new("/nope"), None, "x");
        assert!(matches!(
            ProcessSupervisor::from_state(&state, Duration::from_secs(1)),
            Err(BridgeError::VendorNotReady)
        ));
    }
}
