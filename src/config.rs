//! Configuration loading, environment overrides and validation.
//!
//! Precedence is env vars > `config.toml` > built-in defaults. Every
//! section is optional; an empty file yields a runnable configuration with
//! no tools, no sources and the vault disabled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

use crate::supervisor::{LaunchSpec, SupervisorConfig};

/// Env var naming an alternative config file.
pub const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Runtime paths and intervals.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Restart and shutdown tuning for supervised tools.
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Tool servers to supervise.
    #[serde(default)]
    pub tools: Vec<LaunchSpec>,

    /// Downstream agent endpoint.
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Password-vault CLI integration.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Feed sources with ID-set dedup.
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// Per-channel sources with cursor dedup.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// `[runtime]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Data directory (default `~/.switchboard`).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Seconds between `health.json` writes.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            health_interval_secs: default_health_interval(),
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// Automatic restarts per process.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Backoff unit in milliseconds.
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,

    /// Seconds between SIGTERM and a forced kill.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Directory searched for tool binaries (default `<data_dir>/bin`).
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            grace_period_secs: default_grace_period(),
            tools_dir: None,
        }
    }
}

/// `[forward]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// URL the forwarder posts `{"text": ...}` to.
    #[serde(default)]
    pub url: Option<String>,

    /// Name of the env var holding an optional bearer token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_forward_timeout")]
    pub timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_env: None,
            timeout_secs: default_forward_timeout(),
        }
    }
}

/// `[vault]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Whether the vault session is started.
    #[serde(default)]
    pub enabled: bool,

    /// Vault CLI executable.
    #[serde(default = "default_vault_command")]
    pub command: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_vault_timeout")]
    pub timeout_secs: u64,

    /// Per-stream output limit in bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Seconds between background syncs.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Env var the CLI reads its session token from.
    #[serde(default = "default_session_env")]
    pub session_env: String,

    /// Env var the CLI reads its state directory from.
    #[serde(default = "default_state_dir_env")]
    pub state_dir_env: String,

    /// Self-hosted server URL, configured before login.
    #[serde(default)]
    pub server_url: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_vault_command(),
            timeout_secs: default_vault_timeout(),
            max_output_bytes: default_max_output_bytes(),
            sync_interval_secs: default_sync_interval(),
            session_env: default_session_env(),
            state_dir_env: default_state_dir_env(),
            server_url: None,
        }
    }
}

/// One `[[feeds]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Unique poller name, also the source label in forwarded text.
    pub name: String,
    /// URL returning a JSON array of feed items.
    pub url: String,
    /// Seconds between polls.
    #[serde(default = "default_feed_interval")]
    pub interval_secs: u64,
    /// Poll once at startup.
    #[serde(default = "default_true")]
    pub run_immediately: bool,
    /// Seen-id count that triggers trimming.
    #[serde(default = "default_seen_cap")]
    pub seen_cap: usize,
    /// Seen-id count kept after trimming.
    #[serde(default = "default_seen_keep")]
    pub seen_keep: usize,
}

/// One `[[channels]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Unique poller name, also the source label in forwarded text.
    pub name: String,
    /// Base URL of the channel bridge.
    pub base_url: String,
    /// Seconds between polls.
    #[serde(default = "default_channel_interval")]
    pub interval_secs: u64,
    /// Poll once at startup.
    #[serde(default = "default_true")]
    pub run_immediately: bool,
    /// Messages fetched per channel per poll.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Fixed channel list; discovered from the bridge when absent.
    #[serde(default)]
    pub channel_ids: Option<Vec<String>>,
}

fn default_health_interval() -> u64 {
    30
}
fn default_max_restarts() -> u32 {
    crate::supervisor::DEFAULT_MAX_RESTARTS
}
fn default_restart_base_delay_ms() -> u64 {
    1000
}
fn default_grace_period() -> u64 {
    5
}
fn default_forward_timeout() -> u64 {
    15
}
fn default_vault_command() -> String {
    "bw".to_owned()
}
fn default_vault_timeout() -> u64 {
    30
}
fn default_max_output_bytes() -> usize {
    crate::vault::queue::DEFAULT_MAX_OUTPUT_BYTES
}
fn default_sync_interval() -> u64 {
    300
}
fn default_session_env() -> String {
    "BW_SESSION".to_owned()
}
fn default_state_dir_env() -> String {
    "BITWARDENCLI_APPDATA_DIR".to_owned()
}
fn default_feed_interval() -> u64 {
    300
}
fn default_channel_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_seen_cap() -> usize {
    crate::dedup::seen::DEFAULT_SEEN_CAP
}
fn default_seen_keep() -> usize {
    crate::dedup::seen::DEFAULT_SEEN_KEEP
}
fn default_batch_limit() -> usize {
    20
}

impl Config {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("invalid config: {e}"))
    }

    /// Apply env var overrides through a resolver.
    ///
    /// Takes the resolver as a closure so tests never touch process env.
    /// Unparseable numeric or boolean values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SWITCHBOARD_FORWARD_URL") {
            self.forward.url = Some(v);
        }
        if let Some(v) = env("SWITCHBOARD_TOOLS_DIR") {
            self.supervisor.tools_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("SWITCHBOARD_VAULT_COMMAND") {
            self.vault.command = v;
        }
        if let Some(v) = env("SWITCHBOARD_VAULT_ENABLED") {
            match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.vault.enabled = true,
                "0" | "false" | "no" => self.vault.enabled = false,
                _ => warn_invalid("SWITCHBOARD_VAULT_ENABLED", &v),
            }
        }
        if let Some(v) = env("SWITCHBOARD_MAX_RESTARTS") {
            match v.parse() {
                Ok(n) => self.supervisor.max_restarts = n,
                Err(_) => warn_invalid("SWITCHBOARD_MAX_RESTARTS", &v),
            }
        }
        if let Some(v) = env("SWITCHBOARD_HEALTH_INTERVAL_SECS") {
            match v.parse() {
                Ok(n) => self.runtime.health_interval_secs = n,
                Err(_) => warn_invalid("SWITCHBOARD_HEALTH_INTERVAL_SECS", &v),
            }
        }
    }

    /// Reject configurations that cannot run.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut tools = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                bail!("tool with command '{}' has an empty name", tool.command);
            }
            if !tools.insert(tool.name.as_str()) {
                bail!("duplicate tool name '{}'", tool.name);
            }
        }

        if self.runtime.health_interval_secs == 0 {
            bail!("runtime.health_interval_secs must be greater than zero");
        }

        let mut pollers = HashSet::from(["health"]);
        for feed in &self.feeds {
            if !pollers.insert(feed.name.as_str()) {
                bail!("duplicate poller name '{}'", feed.name);
            }
            if feed.interval_secs == 0 {
                bail!("feed '{}' has a zero interval", feed.name);
            }
            if feed.seen_keep > feed.seen_cap {
                bail!(
                    "feed '{}': seen_keep ({}) exceeds seen_cap ({})",
                    feed.name,
                    feed.seen_keep,
                    feed.seen_cap
                );
            }
        }
        for channel in &self.channels {
            if !pollers.insert(channel.name.as_str()) {
                bail!("duplicate poller name '{}'", channel.name);
            }
            if channel.interval_secs == 0 {
                bail!("channel source '{}' has a zero interval", channel.name);
            }
            if channel.batch_limit == 0 {
                bail!("channel source '{}' has a zero batch_limit", channel.name);
            }
        }

        let has_sources = !self.feeds.is_empty() || !self.channels.is_empty();
        if has_sources && self.forward.url.as_deref().map_or(true, |url| url.trim().is_empty()) {
            bail!("sources are configured but forward.url is not set");
        }

        if self.vault.enabled {
            if self.vault.command.trim().is_empty() {
                bail!("vault.command must not be empty");
            }
            if self.vault.timeout_secs == 0 {
                bail!("vault.timeout_secs must be greater than zero");
            }
            if self.vault.sync_interval_secs == 0 {
                bail!("vault.sync_interval_secs must be greater than zero");
            }
        }
        Ok(())
    }

    /// Resolved data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no data dir is configured and the home
    /// directory cannot be determined.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.runtime.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }

    /// Supervisor tuning with the tools directory resolved against `data_dir`.
    pub fn supervisor_config(&self, data_dir: &Path) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: self.supervisor.max_restarts,
            restart_base_delay: Duration::from_millis(self.supervisor.restart_base_delay_ms),
            grace_period: Duration::from_secs(self.supervisor.grace_period_secs),
            tools_dir: self
                .supervisor
                .tools_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("bin")),
        }
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value = %value, "ignoring invalid env override");
}

/// Load configuration from a TOML file and apply process env overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config = Config::from_toml(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Config file path: `explicit`, else `$SWITCHBOARD_CONFIG`, else
/// `~/.switchboard/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Resolve the default data directory (`~/.switchboard/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".switchboard"))
}
