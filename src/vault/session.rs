//! Vault session state machine.
//!
//! ```text
//! logged_out --login--> locked --unlock--> unlocked
//!                       locked <--lock---- unlocked
//! logged_out <--logout-- locked | unlocked
//! ```
//!
//! The session token exists only in the unlocked state. Every dependent
//! operation must fetch it through [`VaultSession::get_session`] right
//! before use; tokens are never cached outside this type.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CommandQueue, SessionToken, VaultCommand, VaultError};
use crate::credentials::SecretValue;
use crate::poller::delayed_interval;

/// Default interval between background syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

const CLIENT_ID_ENV: &str = "BW_CLIENTID";
const CLIENT_SECRET_ENV: &str = "BW_CLIENTSECRET";
const PASSWORD_ENV: &str = "BW_PASSWORD";

/// Credentials needed to log in and unlock.
#[derive(Debug, Clone)]
pub struct VaultCredentials {
    /// API client id.
    pub client_id: SecretValue,
    /// API client secret.
    pub client_secret: SecretValue,
    /// Master password.
    pub password: SecretValue,
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No account is logged in.
    LoggedOut,
    /// Logged in, vault locked.
    Locked,
    /// Vault unlocked; a session token is available.
    Unlocked,
}

enum Phase {
    LoggedOut,
    Locked,
    Unlocked(SessionToken),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::LoggedOut => SessionState::LoggedOut,
            Self::Locked => SessionState::Locked,
            Self::Unlocked(_) => SessionState::Unlocked,
        }
    }
}

/// Health snapshot of the vault session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultStatus {
    /// Current state.
    pub state: SessionState,
    /// Whether the background sync timer is active.
    pub sync_running: bool,
    /// Time of the last successful sync.
    pub last_sync: Option<DateTime<Utc>>,
    /// Error of the last sync attempt, cleared by a success.
    pub last_sync_error: Option<String>,
    /// Number of successful syncs.
    pub sync_count: u64,
}

#[derive(Debug, Default)]
struct SyncRecord {
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
    count: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A vault session driven through a [`CommandQueue`].
pub struct VaultSession {
    queue: Arc<CommandQueue>,
    credentials: VaultCredentials,
    server_url: Option<String>,
    sync_interval: Duration,
    phase: Mutex<Phase>,
    sync: Mutex<SyncRecord>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl VaultSession {
    /// Create a logged-out session.
    ///
    /// With `server_url` set, the CLI is pointed at that server before login.
    pub fn new(
        queue: Arc<CommandQueue>,
        credentials: VaultCredentials,
        sync_interval: Duration,
        server_url: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            credentials,
            server_url,
            sync_interval,
            phase: Mutex::new(Phase::LoggedOut),
            sync: Mutex::new(SyncRecord::default()),
            sync_task: Mutex::new(None),
        })
    }

    /// The queue all session commands run through.
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        lock(&self.phase).state()
    }

    /// Log in, unlock, sync once and start the periodic sync timer.
    ///
    /// Steps already done are skipped, so calling this on an unlocked
    /// session does nothing. A failed initial sync is logged, not returned;
    /// the timer retries it.
    ///
    /// # Errors
    ///
    /// Returns the [`VaultError`] of a failed login or unlock; the session
    /// stays in the last state reached.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), VaultError> {
        let state = self.state();
        if state == SessionState::Unlocked {
            return Ok(());
        }

        if state == SessionState::LoggedOut {
            self.login().await?;
            *lock(&self.phase) = Phase::Locked;
            info!("vault logged in");
        }

        let token = self.unlock().await?;
        *lock(&self.phase) = Phase::Unlocked(token);
        info!("vault unlocked");

        if let Err(e) = self.sync().await {
            warn!(error = %e, "initial vault sync failed");
        }
        self.start_sync_timer();
        Ok(())
    }

    /// Current session token.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unauthenticated`] unless the session is unlocked.
    pub fn get_session(&self) -> Result<SessionToken, VaultError> {
        match &*lock(&self.phase) {
            Phase::Unlocked(token) => Ok(token.clone()),
            _ => Err(VaultError::Unauthenticated),
        }
    }

    /// Pull the latest vault data.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unauthenticated`] when locked, or the CLI error.
    pub async fn sync(&self) -> Result<(), VaultError> {
        let token = self.get_session()?;
        let result = self.queue.exec(VaultCommand::new(["sync"]).session(token)).await;
        let mut record = lock(&self.sync);
        match result {
            Ok(_) => {
                record.count = record.count.saturating_add(1);
                record.last_sync = Some(Utc::now());
                record.last_error = None;
                debug!("vault synced");
                Ok(())
            }
            Err(e) => {
                record.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Lock the vault, discarding the token (unlocked → locked).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unauthenticated`] when not unlocked, or the CLI
    /// error; on a CLI error the session stays unlocked.
    pub async fn lock(&self) -> Result<(), VaultError> {
        let token = self.get_session()?;
        self.queue.exec(VaultCommand::new(["lock"]).session(token)).await?;
        *lock(&self.phase) = Phase::Locked;
        info!("vault locked");
        Ok(())
    }

    /// Log out (locked or unlocked → logged out).
    ///
    /// # Errors
    ///
    /// Returns the CLI error; the state is left unchanged in that case.
    pub async fn logout(&self) -> Result<(), VaultError> {
        if self.state() == SessionState::LoggedOut {
            return Ok(());
        }
        self.queue.exec(VaultCommand::new(["logout"])).await?;
        *lock(&self.phase) = Phase::LoggedOut;
        info!("vault logged out");
        Ok(())
    }

    /// Stop syncing, lock and log out. Errors are logged; always completes
    /// in the logged-out state.
    pub async fn shutdown(&self) {
        if let Some(task) = lock(&self.sync_task).take() {
            task.abort();
        }

        if self.state() == SessionState::Unlocked {
            if let Err(e) = self.lock().await {
                warn!(error = %e, "vault lock failed during shutdown");
            }
            let mut phase = lock(&self.phase);
            if matches!(*phase, Phase::Unlocked(_)) {
                *phase = Phase::Locked;
            }
        }

        if self.state() != SessionState::LoggedOut {
            if let Err(e) = self.logout().await {
                warn!(error = %e, "vault logout failed during shutdown");
            }
            *lock(&self.phase) = Phase::LoggedOut;
        }
        info!("vault session shut down");
    }

    /// Read-only snapshot for health checks.
    pub fn status(&self) -> VaultStatus {
        let state = self.state();
        let sync_running = lock(&self.sync_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        let record = lock(&self.sync);
        VaultStatus {
            state,
            sync_running,
            last_sync: record.last_sync,
            last_sync_error: record.last_error.clone(),
            sync_count: record.count,
        }
    }

    async fn login(&self) -> Result<(), VaultError> {
        if let Some(url) = &self.server_url {
            self.queue
                .exec(VaultCommand::new(["config", "server", url.as_str()]))
                .await?;
        }

        let command = VaultCommand::new(["login", "--apikey"])
            .env(CLIENT_ID_ENV, self.credentials.client_id.expose())
            .env(CLIENT_SECRET_ENV, self.credentials.client_secret.expose());
        match self.queue.exec(command).await {
            Ok(_) => Ok(()),
            Err(VaultError::CommandFailed { detail, .. })
                if detail.to_ascii_lowercase().contains("already logged in") =>
            {
                debug!("vault CLI already logged in");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn unlock(&self) -> Result<SessionToken, VaultError> {
        let command = VaultCommand::new(["unlock", "--passwordenv", PASSWORD_ENV, "--raw"])
            .env(PASSWORD_ENV, self.credentials.password.expose());
        let output = self.queue.exec(command).await?;
        let token = output.trim();
        if token.is_empty() {
            return Err(VaultError::InvalidResponse(
                "unlock returned an empty session token".to_owned(),
            ));
        }
        Ok(SessionToken::new(token))
    }

    fn start_sync_timer(self: &Arc<Self>) {
        let mut slot = lock(&self.sync_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let interval = self.sync_interval;
        if interval.is_zero() {
            warn!("vault sync interval is zero, background sync disabled");
            return;
        }

        let session = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = delayed_interval(interval);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                if let Err(e) = session.sync().await {
                    warn!(error = %e, "periodic vault sync failed");
                }
            }
        }));
        debug!(
            interval_secs = interval.as_secs(),
            "vault sync timer started"
        );
    }
}
