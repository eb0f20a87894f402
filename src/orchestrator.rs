//! Single owner of every long-lived component.
//!
//! The orchestrator holds the process table, the poll scheduler and the
//! optional vault session, starts them in dependency order and shuts them
//! down in reverse. Health is read from their status snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::health::HealthReport;
use crate::poller::{PollScheduler, PollerHandle, PollerSpec, SchedulerError};
use crate::supervisor::ProcessSupervisor;
use crate::vault::VaultSession;

/// Errors raised while assembling the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A supervisor with this name is already registered.
    #[error("process '{0}' is already registered")]
    DuplicateProcess(String),
    /// Poller registration failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Owns supervisors, pollers and the vault session.
pub struct Orchestrator {
    processes: BTreeMap<String, Arc<ProcessSupervisor>>,
    scheduler: PollScheduler,
    vault: Option<Arc<VaultSession>>,
    started: Instant,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an empty orchestrator.
    pub fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            scheduler: PollScheduler::new(),
            vault: None,
            started: Instant::now(),
        }
    }

    /// Register a supervised process.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateProcess`] if the name is taken.
    pub fn add_process(&mut self, supervisor: Arc<ProcessSupervisor>) -> Result<(), OrchestratorError> {
        let name = supervisor.name().to_owned();
        if self.processes.contains_key(&name) {
            return Err(OrchestratorError::DuplicateProcess(name));
        }
        self.processes.insert(name, supervisor);
        Ok(())
    }

    /// Register a poller.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Scheduler`] for duplicate names or a
    /// zero interval.
    pub fn add_poller(&self, spec: PollerSpec) -> Result<PollerHandle, OrchestratorError> {
        Ok(self.scheduler.register(spec)?)
    }

    /// Attach the vault session.
    pub fn set_vault(&mut self, session: Arc<VaultSession>) {
        self.vault = Some(session);
    }

    /// The poll scheduler.
    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// A registered supervisor by name.
    pub fn process(&self, name: &str) -> Option<&Arc<ProcessSupervisor>> {
        self.processes.get(name)
    }

    /// The vault session, if attached.
    pub fn vault(&self) -> Option<&Arc<VaultSession>> {
        self.vault.as_ref()
    }

    /// Start processes, initialize the vault, then start pollers.
    ///
    /// Component failures are logged and left visible in [`health`](Self::health);
    /// they do not abort startup.
    pub async fn start(&self) {
        for (name, supervisor) in &self.processes {
            match supervisor.start() {
                Ok(pid) => info!(process = %name, pid, "supervised process up"),
                Err(e) => error!(process = %name, error = %e, "supervised process failed to start"),
            }
        }

        if let Some(vault) = &self.vault {
            if let Err(e) = vault.initialize().await {
                error!(error = %e, "vault session initialization failed");
            }
        }

        self.scheduler.start_all();
        info!(
            processes = self.processes.len(),
            pollers = self.scheduler.len(),
            vault = self.vault.is_some(),
            "orchestrator started"
        );
    }

    /// Stop pollers, shut down the vault, then stop every process.
    ///
    /// Each step is bounded; this never fails.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.scheduler.stop_all();

        if let Some(vault) = &self.vault {
            vault.shutdown().await;
        }

        let mut stops = JoinSet::new();
        for supervisor in self.processes.values() {
            let supervisor = Arc::clone(supervisor);
            stops.spawn(async move { supervisor.stop().await });
        }
        while stops.join_next().await.is_some() {}

        let still_running: Vec<_> = self
            .processes
            .values()
            .filter(|s| s.status().running)
            .map(|s| s.name().to_owned())
            .collect();
        if !still_running.is_empty() {
            warn!(processes = ?still_running, "processes still running after shutdown");
        }
        info!("orchestrator stopped");
    }

    /// Build a health report from current snapshots. Never blocks.
    pub fn health(&self) -> HealthReport {
        HealthReport::build(
            self.started.elapsed().as_secs(),
            self.processes.values().map(|s| s.status()).collect(),
            self.scheduler.statuses(),
            self.vault.as_ref().map(|v| v.status()),
        )
    }
}
