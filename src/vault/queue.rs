//! Serialized execution of vault CLI calls.
//!
//! Calls are appended to one FIFO channel drained by a single worker, so
//! call N+1 starts only after call N settled. Each call runs in its own
//! task with a timeout: a hung, panicking or failing call fails alone and
//! the next queued call proceeds.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{VaultCommand, VaultError};

/// Default per-call time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-stream output limit (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Raw result of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code (`None` when killed by a signal).
    pub exit_code: Option<i32>,
    /// Captured stdout text.
    pub stdout: String,
    /// Captured stderr text.
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

impl ExecResult {
    /// Returns `true` when the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Something that can execute a single vault CLI invocation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output.
    async fn run(&self, command: &VaultCommand) -> Result<ExecResult, VaultError>;
}

/// Runs the real vault CLI as a child process.
///
/// Owns a private temporary directory used as the working directory and
/// as the CLI's state directory, so separate instances never share disk
/// state. The directory is removed when the runner is dropped.
pub struct ProcessRunner {
    program: PathBuf,
    state_dir: tempfile::TempDir,
    state_dir_env: String,
    session_env: String,
    base_args: Vec<String>,
    base_env: BTreeMap<String, String>,
    max_output_bytes: usize,
}

impl ProcessRunner {
    /// Create a runner for `program` with a fresh state directory.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the temporary directory cannot be created.
    pub fn new(
        program: impl Into<PathBuf>,
        state_dir_env: impl Into<String>,
        session_env: impl Into<String>,
    ) -> Result<Self, VaultError> {
        let state_dir = tempfile::Builder::new()
            .prefix("switchboard-vault-")
            .tempdir()?;
        Ok(Self {
            program: program.into(),
            state_dir,
            state_dir_env: state_dir_env.into(),
            session_env: session_env.into(),
            base_args: Vec::new(),
            base_env: BTreeMap::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        })
    }

    /// Arguments appended to every call (e.g. a non-interactive flag).
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Environment applied to every call, below the per-call overlay.
    pub fn with_base_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.base_env = env;
        self
    }

    /// Per-stream output limit in bytes.
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// The isolated state directory.
    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &VaultCommand) -> Result<ExecResult, VaultError> {
        let subcommand = command.subcommand().to_owned();
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&command.args)
            .args(&self.base_args)
            .envs(&self.base_env)
            .envs(&command.env)
            .env(&self.state_dir_env, self.state_dir.path())
            .current_dir(self.state_dir.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &command.session {
            cmd.env(&self.session_env, token.expose());
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| VaultError::Spawn {
            subcommand: subcommand.clone(),
            detail: e.to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let (stdout, stderr, status) = tokio::try_join!(
            read_capped(stdout, limit, &subcommand),
            read_capped(stderr, limit, &subcommand),
            async {
                child.wait().await.map_err(|e| VaultError::Spawn {
                    subcommand: subcommand.clone(),
                    detail: e.to_string(),
                })
            },
        )?;

        Ok(ExecResult {
            exit_code: status.code(),
            stdout,
            stderr,
            duration: started.elapsed(),
        })
    }
}

async fn read_capped<R>(pipe: Option<R>, limit: usize, subcommand: &str) -> Result<String, VaultError>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    pipe.take(cap)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| VaultError::Spawn {
            subcommand: subcommand.to_owned(),
            detail: format!("reading output: {e}"),
        })?;
    if buf.len() > limit {
        return Err(VaultError::OutputTooLarge {
            subcommand: subcommand.to_owned(),
            limit,
        });
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Turn a raw result into the command's stdout or a typed failure.
///
/// A call fails on a non-zero exit, or when it printed only to stderr.
pub fn interpret(subcommand: &str, result: ExecResult) -> Result<String, VaultError> {
    let stderr = result.stderr.trim();
    if !result.success() {
        let detail = if !stderr.is_empty() {
            stderr.to_owned()
        } else if !result.stdout.trim().is_empty() {
            result.stdout.trim().to_owned()
        } else {
            format!("exit code {:?}", result.exit_code)
        };
        return Err(VaultError::CommandFailed {
            subcommand: subcommand.to_owned(),
            detail,
        });
    }
    if result.stdout.trim().is_empty() && !stderr.is_empty() {
        return Err(VaultError::CommandFailed {
            subcommand: subcommand.to_owned(),
            detail: stderr.to_owned(),
        });
    }
    Ok(result.stdout)
}

struct QueuedCommand {
    command: VaultCommand,
    reply: oneshot::Sender<Result<String, VaultError>>,
}

/// FIFO queue guaranteeing one in-flight CLI call at a time.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    timeout: Duration,
}

impl CommandQueue {
    /// Start the queue worker over `runner`. Must be called inside a Tokio runtime.
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, runner, timeout));
        Self { tx, timeout }
    }

    /// Per-call time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enqueue a call now and return a future resolving to its output.
    ///
    /// The position in the queue is fixed when `submit` returns, not when
    /// the future is first polled.
    pub fn submit(
        &self,
        command: VaultCommand,
    ) -> impl Future<Output = Result<String, VaultError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self.tx.send(QueuedCommand { command, reply }).is_ok();
        async move {
            if !sent {
                return Err(VaultError::QueueClosed);
            }
            rx.await.unwrap_or(Err(VaultError::QueueClosed))
        }
    }

    /// Enqueue a call and wait for its output.
    ///
    /// # Errors
    ///
    /// Returns the call's [`VaultError`]; other queued calls are unaffected.
    pub async fn exec(&self, command: VaultCommand) -> Result<String, VaultError> {
        self.submit(command).await
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
) {
    while let Some(QueuedCommand { command, reply }) = rx.recv().await {
        let subcommand = command.subcommand().to_owned();
        debug!(subcommand = %subcommand, "running vault command");

        let call_runner = Arc::clone(&runner);
        let mut call = tokio::spawn(async move { call_runner.run(&command).await });

        let result = match tokio::time::timeout(timeout, &mut call).await {
            Ok(Ok(Ok(output))) => interpret(&subcommand, output),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => Err(VaultError::Spawn {
                subcommand: subcommand.clone(),
                detail: format!("command task failed: {join_err}"),
            }),
            Err(_) => {
                // Wait for the aborted call to drop (killing its child)
                // before the next call may start.
                call.abort();
                let _ = call.await;
                Err(VaultError::Timeout {
                    subcommand: subcommand.clone(),
                    seconds: timeout.as_secs(),
                })
            }
        };

        if let Err(e) = &result {
            warn!(subcommand = %subcommand, error = %e, "vault command failed");
        }
        if reply.send(result).is_err() {
            debug!(subcommand = %subcommand, "caller dropped before vault command finished");
        }
    }
    debug!("vault command queue closed");
}
