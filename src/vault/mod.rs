//! Password-vault CLI integration.
//!
//! The vault CLI keeps one mutable session on disk and is not safe to run
//! concurrently, so every invocation goes through a single
//! [`queue::CommandQueue`]. [`session::VaultSession`] drives the
//! login/unlock/lock/logout state machine on top of the queue, and
//! [`tools::VaultTools`] exposes vault operations as protocol tools.

pub mod queue;
pub mod session;
pub mod tools;

use std::collections::BTreeMap;

pub use queue::{CommandQueue, CommandRunner, ExecResult, ProcessRunner};
pub use session::{SessionState, VaultCredentials, VaultSession, VaultStatus};
pub use tools::VaultTools;

/// Errors from vault CLI calls and session management.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The session is not unlocked; callers should re-initialize.
    #[error("vault session is not unlocked")]
    Unauthenticated,
    /// The CLI exited non-zero or reported an error.
    #[error("vault command '{subcommand}' failed: {detail}")]
    CommandFailed {
        /// First CLI argument of the failing call.
        subcommand: String,
        /// Error text reported by the CLI.
        detail: String,
    },
    /// The call exceeded its time budget.
    #[error("vault command '{subcommand}' timed out after {seconds}s")]
    Timeout {
        /// First CLI argument of the failing call.
        subcommand: String,
        /// Timeout budget in seconds.
        seconds: u64,
    },
    /// The call produced more output than allowed.
    #[error("vault command '{subcommand}' exceeded {limit} bytes of output")]
    OutputTooLarge {
        /// First CLI argument of the failing call.
        subcommand: String,
        /// Output limit in bytes.
        limit: usize,
    },
    /// The CLI could not be started.
    #[error("failed to run vault command '{subcommand}': {detail}")]
    Spawn {
        /// First CLI argument of the failing call.
        subcommand: String,
        /// Error detail.
        detail: String,
    },
    /// The CLI answered with something unusable.
    #[error("unexpected vault response: {0}")]
    InvalidResponse(String),
    /// The queue worker is gone.
    #[error("vault command queue is closed")]
    QueueClosed,
    /// Local I/O failure while preparing the CLI environment.
    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque credential for an unlocked vault session.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for handing to the CLI.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// One CLI invocation: arguments, environment overlay, optional session.
#[derive(Clone, Default)]
pub struct VaultCommand {
    /// Arguments; the first one names the subcommand in errors.
    pub args: Vec<String>,
    /// Environment variables added for this call only.
    pub env: BTreeMap<String, String>,
    /// Session token exported to the CLI for session-bound commands.
    pub session: Option<SessionToken>,
}

impl VaultCommand {
    /// Command with the given arguments and nothing else.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            session: None,
        }
    }

    /// Add an environment variable for this call.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Attach a session token.
    pub fn session(mut self, token: SessionToken) -> Self {
        self.session = Some(token);
        self
    }

    /// Subcommand name used in errors and logs.
    pub fn subcommand(&self) -> &str {
        self.args.first().map_or("<none>", String::as_str)
    }
}

impl std::fmt::Debug for VaultCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCommand")
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("session", &self.session.is_some())
            .finish()
    }
}
