//! Lifecycle management for vendored tool-server binaries.
//!
//! A [`ProcessSupervisor`] owns one child process: it resolves and spawns
//! the executable, pipes its output into `tracing`, restarts it after a
//! crash with linear backoff (bounded by `max_restarts`), and stops it with
//! SIGTERM followed by a kill after the grace period.
//!
//! Faults never escape into the caller's control flow: spawn errors and
//! crashes are logged and recorded in [`SupervisorStatus`].

pub mod launch;
pub mod output;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use launch::{resolve_executable, LaunchSpec};
use output::Stream;

/// Default number of automatic restarts before giving up.
pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// Default backoff unit; attempt `n` waits `n` units.
pub const DEFAULT_RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default time a process gets to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Errors from starting a supervised process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The command was not found in the tools directory or on `PATH`.
    #[error("executable '{command}' for {name} not found")]
    ExecutableNotFound {
        /// Process name.
        name: String,
        /// Command as configured.
        command: String,
    },
    /// The OS refused to spawn the process.
    #[error("failed to spawn {name}: {detail}")]
    Spawn {
        /// Process name.
        name: String,
        /// Error detail.
        detail: String,
    },
}

/// Restart and shutdown tuning shared by all supervisors.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Automatic restarts allowed over the supervisor's lifetime.
    pub max_restarts: u32,
    /// Backoff unit between restarts.
    pub restart_base_delay: Duration,
    /// Time allowed between SIGTERM and a forced kill.
    pub grace_period: Duration,
    /// Directory searched for bare command names before `PATH`.
    pub tools_dir: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_base_delay: DEFAULT_RESTART_BASE_DELAY,
            grace_period: DEFAULT_GRACE_PERIOD,
            tools_dir: PathBuf::from("bin"),
        }
    }
}

/// Delay before restart attempt `attempt` (1-based): `attempt * base`.
pub fn restart_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

/// Run state of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Never started.
    NotStarted,
    /// Child is alive.
    Running {
        /// OS process id.
        pid: u32,
        /// Wall-clock start time.
        started_at: DateTime<Utc>,
    },
    /// Child exited unexpectedly or could not be spawned.
    Crashed {
        /// Why it is not running.
        last_error: String,
    },
    /// Stopped on request.
    Stopped,
}

/// Health snapshot of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    /// Process name.
    pub name: String,
    /// Whether the child is alive.
    pub running: bool,
    /// OS process id while running.
    pub pid: Option<u32>,
    /// Seconds since the current child started.
    pub uptime_secs: Option<u64>,
    /// Automatic restarts performed so far.
    pub restart_count: u32,
    /// Most recent spawn or exit error.
    pub last_error: Option<String>,
    /// Automatic restarts are exhausted. Cleared by an explicit
    /// [`ProcessSupervisor::start`].
    pub max_restarts_reached: bool,
    /// Loopback port of the tool server, if configured.
    pub port: Option<u16>,
}

struct Inner {
    state: RunState,
    started: Option<Instant>,
    restart_attempts: u32,
    last_error: Option<String>,
    max_restarts_reached: bool,
    monitor: Option<JoinHandle<()>>,
}

/// Supervisor for a single external process.
pub struct ProcessSupervisor {
    spec: LaunchSpec,
    config: SupervisorConfig,
    inner: Mutex<Inner>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProcessSupervisor {
    /// Create a supervisor. Nothing is spawned until [`start`](Self::start).
    pub fn new(spec: LaunchSpec, config: SupervisorConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            spec,
            config,
            inner: Mutex::new(Inner {
                state: RunState::NotStarted,
                started: None,
                restart_attempts: 0,
                last_error: None,
                max_restarts_reached: false,
                monitor: None,
            }),
            shutdown_tx,
        })
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Launch description.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Spawn the process and begin monitoring it.
    ///
    /// Starting an already running process returns its pid. The restart
    /// counter is not reset: a supervisor that exhausted its restarts runs
    /// again, but a further crash is not retried.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when the executable cannot be resolved or
    /// spawned. The failure is also recorded as the crashed state.
    pub fn start(self: &Arc<Self>) -> Result<u32, SupervisorError> {
        let mut inner = self.lock_inner();
        if let RunState::Running { pid, .. } = inner.state {
            return Ok(pid);
        }
        self.shutdown_tx.send_replace(false);
        if let Some(stale) = inner.monitor.take() {
            stale.abort();
        }

        let child = self.launch(&mut inner)?;
        // An explicit start revives a process that exhausted its restarts;
        // the attempt counter is kept, so one more crash gives up again.
        inner.max_restarts_reached = false;
        let pid = child.id().unwrap_or_default();
        let supervisor = Arc::clone(self);
        inner.monitor = Some(tokio::spawn(async move { supervisor.monitor(child).await }));
        Ok(pid)
    }

    /// Stop the process: SIGTERM, wait up to the grace period, then kill.
    ///
    /// Suppresses further automatic restarts and cancels a pending one.
    /// Safe to call when never started or already stopped. Always returns.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let Some(mut monitor) = self.lock_inner().monitor.take() else {
            return;
        };

        let bound = self
            .config
            .grace_period
            .saturating_add(Duration::from_secs(2));
        match tokio::time::timeout(bound, &mut monitor).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(process = %self.spec.name, error = %e, "monitor task failed"),
            Err(_) => {
                warn!(process = %self.spec.name, "monitor did not finish in time, aborting");
                monitor.abort();
                self.mark_stopped();
            }
        }
    }

    /// Read-only snapshot for health checks. Never blocks on the child.
    pub fn status(&self) -> SupervisorStatus {
        let inner = self.lock_inner();
        let (running, pid) = match inner.state {
            RunState::Running { pid, .. } => (true, Some(pid)),
            _ => (false, None),
        };
        SupervisorStatus {
            name: self.spec.name.clone(),
            running,
            pid,
            uptime_secs: if running {
                inner.started.map(|at| at.elapsed().as_secs())
            } else {
                None
            },
            restart_count: inner.restart_attempts,
            last_error: inner.last_error.clone(),
            max_restarts_reached: inner.max_restarts_reached,
            port: self.spec.port,
        }
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.lock_inner().state.clone()
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolve, spawn and attach output readers. Records the outcome.
    fn launch(&self, inner: &mut Inner) -> Result<Child, SupervisorError> {
        let name = &self.spec.name;
        let Some(program) = resolve_executable(&self.spec.command, &self.config.tools_dir) else {
            let err = SupervisorError::ExecutableNotFound {
                name: name.clone(),
                command: self.spec.command.clone(),
            };
            error!(process = %name, command = %self.spec.command, "executable not found");
            record_crash(inner, err.to_string());
            return Err(err);
        };

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&self.spec.args)
            .envs(self.spec.merged_env())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = SupervisorError::Spawn {
                    name: name.clone(),
                    detail: e.to_string(),
                };
                error!(process = %name, program = %program.display(), error = %e, "spawn failed");
                record_crash(inner, err.to_string());
                return Err(err);
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(output::forward_lines(name.clone(), Stream::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(output::forward_lines(name.clone(), Stream::Stderr, stderr));
        }

        let pid = child.id().unwrap_or_default();
        inner.state = RunState::Running {
            pid,
            started_at: Utc::now(),
        };
        inner.started = Some(Instant::now());
        info!(process = %name, pid, program = %program.display(), "process started");
        Ok(child)
    }

    /// Watch the child until shutdown, restarting it after crashes.
    async fn monitor(self: Arc<Self>, first: Child) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut current = Some(first);

        loop {
            if let Some(mut child) = current.take() {
                let exit = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = shutdown_rx.wait_for(|stop| *stop) => None,
                };
                let Some(status) = exit else {
                    self.terminate(&mut child).await;
                    self.mark_stopped();
                    return;
                };
                if self.is_shutting_down() {
                    self.mark_stopped();
                    return;
                }
                let reason = match status {
                    Ok(status) => format!("process exited unexpectedly ({status})"),
                    Err(e) => format!("failed to wait for process: {e}"),
                };
                warn!(process = %self.spec.name, reason = %reason, "process crashed");
                record_crash(&mut self.lock_inner(), reason);
            } else if self.is_shutting_down() {
                return;
            }

            let Some(attempt) = self.next_attempt() else {
                return;
            };
            let delay = restart_delay(attempt, self.config.restart_base_delay);
            info!(
                process = %self.spec.name,
                attempt,
                max = self.config.max_restarts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling restart"
            );
            let cancelled = tokio::select! {
                () = tokio::time::sleep(delay) => false,
                _ = shutdown_rx.wait_for(|stop| *stop) => true,
            };
            if cancelled {
                debug!(process = %self.spec.name, "restart cancelled by shutdown");
                return;
            }

            let mut inner = self.lock_inner();
            if self.is_shutting_down() {
                return;
            }
            // A failed launch is recorded as a crash and counts as an attempt.
            current = self.launch(&mut inner).ok();
        }
    }

    /// Reserve the next restart attempt, or give up when exhausted.
    fn next_attempt(&self) -> Option<u32> {
        let mut inner = self.lock_inner();
        if inner.restart_attempts >= self.config.max_restarts {
            inner.max_restarts_reached = true;
            error!(
                process = %self.spec.name,
                restarts = inner.restart_attempts,
                "max restarts reached, giving up"
            );
            return None;
        }
        inner.restart_attempts = inner.restart_attempts.saturating_add(1);
        Some(inner.restart_attempts)
    }

    async fn terminate(&self, child: &mut Child) {
        let name = &self.spec.name;
        if let Some(pid) = child.id() {
            info!(process = %name, pid, "sending SIGTERM");
            send_sigterm(pid).await;
        }

        match tokio::time::timeout(self.config.grace_period, child.wait()).await {
            Ok(Ok(status)) => info!(process = %name, %status, "process exited"),
            Ok(Err(e)) => warn!(process = %name, error = %e, "failed to wait for process"),
            Err(_) => {
                warn!(process = %name, "grace period expired, killing process");
                if let Err(e) = child.kill().await {
                    warn!(process = %name, error = %e, "failed to kill process");
                }
            }
        }
    }

    fn mark_stopped(&self) {
        let mut inner = self.lock_inner();
        inner.state = RunState::Stopped;
        inner.started = None;
    }
}

fn record_crash(inner: &mut Inner, reason: String) {
    inner.state = RunState::Crashed {
        last_error: reason.clone(),
    };
    inner.started = None;
    inner.last_error = Some(reason);
}

/// Send SIGTERM through the shell builtin `kill`.
#[cfg(unix)]
async fn send_sigterm(pid: u32) {
    let result = tokio::process::Command::new("sh")
        .args(["-c", &format!("kill -TERM {pid}")])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!(pid, error = %e, "failed to run kill");
    }
}

#[cfg(not(unix))]
async fn send_sigterm(_pid: u32) {}
