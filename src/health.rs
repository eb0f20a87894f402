//! Health reporting and `health.json` file writing.
//!
//! A [`HealthReport`] is assembled from status snapshots only, so building
//! one never waits on a child process, a CLI call or a poll job.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::poller::PollerStatus;
use crate::supervisor::SupervisorStatus;
use crate::vault::{SessionState, VaultStatus};

/// File name of the health report inside the data directory.
pub const HEALTH_FILE: &str = "health.json";

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    /// Working normally.
    Healthy,
    /// Working with errors, or recovering.
    Degraded,
    /// Not working and not expected to recover by itself.
    Unhealthy,
}

impl ComponentHealth {
    /// Health of a supervised process.
    pub fn of_process(status: &SupervisorStatus) -> Self {
        if status.running {
            Self::Healthy
        } else if !status.max_restarts_reached && status.restart_count > 0 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    /// Health of a poller.
    pub fn of_poller(status: &PollerStatus) -> Self {
        if status.last_error.is_some() {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// Health of the vault session.
    pub fn of_vault(status: &VaultStatus) -> Self {
        match status.state {
            SessionState::Unlocked if status.last_sync_error.is_some() => Self::Degraded,
            SessionState::Unlocked => Self::Healthy,
            SessionState::Locked | SessionState::LoggedOut => Self::Unhealthy,
        }
    }
}

/// A component status paired with its derived health.
#[derive(Debug, Clone, Serialize)]
pub struct Component<T> {
    /// Derived health.
    pub health: ComponentHealth,
    /// Raw status snapshot.
    #[serde(flatten)]
    pub status: T,
}

/// Health report written to `<data_dir>/health.json`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst health among all components.
    pub status: ComponentHealth,
    /// Seconds since the orchestrator started.
    pub uptime_secs: u64,
    /// When this report was built.
    pub generated_at: DateTime<Utc>,
    /// Supervised processes.
    pub processes: Vec<Component<SupervisorStatus>>,
    /// Registered pollers.
    pub pollers: Vec<Component<PollerStatus>>,
    /// Vault session, when enabled.
    pub vault: Option<Component<VaultStatus>>,
}

impl HealthReport {
    /// Build a report from component snapshots.
    pub fn build(
        uptime_secs: u64,
        processes: Vec<SupervisorStatus>,
        pollers: Vec<PollerStatus>,
        vault: Option<VaultStatus>,
    ) -> Self {
        let processes: Vec<_> = processes
            .into_iter()
            .map(|status| Component {
                health: ComponentHealth::of_process(&status),
                status,
            })
            .collect();
        let pollers: Vec<_> = pollers
            .into_iter()
            .map(|status| Component {
                health: ComponentHealth::of_poller(&status),
                status,
            })
            .collect();
        let vault = vault.map(|status| Component {
            health: ComponentHealth::of_vault(&status),
            status,
        });

        let status = processes
            .iter()
            .map(|c| c.health)
            .chain(pollers.iter().map(|c| c.health))
            .chain(vault.iter().map(|c| c.health))
            .max()
            .unwrap_or(ComponentHealth::Healthy);

        Self {
            status,
            uptime_secs,
            generated_at: Utc::now(),
            processes,
            pollers,
            vault,
        }
    }
}

/// Write the report to disk atomically.
///
/// Writes to a temporary file first, then renames to the final path, so
/// readers always see a complete file.
///
/// # Errors
///
/// Returns an error if serialization or file operations fail.
pub async fn write_health_file(report: &HealthReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize health report")?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .context("failed to write health temp file")?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .context("failed to rename health temp file")?;

    debug!(path = %path.display(), "health report updated");
    Ok(())
}

/// Read a previously written report as raw JSON.
///
/// # Errors
///
/// Returns an error if the file is missing or not valid JSON.
pub fn read_health_file(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read health file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse health file {}", path.display()))
}
