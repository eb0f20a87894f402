//! Switchboard CLI entry point.
//!
//! Provides `start`, `check` and `health` subcommands for running the
//! service, validating a configuration, or printing the last health report.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use switchboard::config::{config_path, load_config, Config};
use switchboard::credentials::{self, Credentials, VAULT_SESSION_BLOB};
use switchboard::health::{read_health_file, write_health_file, HEALTH_FILE};
use switchboard::orchestrator::Orchestrator;
use switchboard::poller::{poll_fn, PollerSpec};
use switchboard::sources::{
    ChannelPoll, FeedPoll, Forwarder, HttpChannelFetcher, HttpFeedFetcher, WebhookForwarder,
};
use switchboard::supervisor::{resolve_executable, ProcessSupervisor};
use switchboard::vault::{CommandQueue, ProcessRunner, VaultSession};

/// Switchboard: supervised tool servers, vault session and source pollers.
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Path to `config.toml` (default: `$SWITCHBOARD_CONFIG` or `~/.switchboard/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the service until Ctrl-C or SIGTERM.
    Start,
    /// Load and validate the configuration, then exit.
    Check,
    /// Print the last written health report.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = config_path(cli.config.as_deref(), |key| std::env::var(key).ok())?;

    match cli.command {
        Command::Start => handle_start(&path).await,
        Command::Check => handle_check(&path),
        Command::Health => handle_health(&path),
    }
}

fn load_validated(path: &Path) -> anyhow::Result<Config> {
    let config = load_config(path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Run the service.
async fn handle_start(path: &Path) -> anyhow::Result<()> {
    let config = load_validated(path)?;
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let _logging_guard = switchboard::logging::init_production(&data_dir.join("logs"))?;
    info!(config = %path.display(), data_dir = %data_dir.display(), "switchboard starting");

    let credentials = credentials::load_runtime_credentials(&data_dir)?;
    let orchestrator = Arc::new(build_orchestrator(&config, &data_dir, &credentials)?);

    let health_path = data_dir.join(HEALTH_FILE);
    register_health_writer(&orchestrator, &config, health_path.clone())?;

    orchestrator.start().await;
    wait_for_shutdown().await?;
    orchestrator.shutdown().await;

    if let Err(e) = write_health_file(&orchestrator.health(), &health_path).await {
        warn!(error = %e, "failed to write final health report");
    }
    info!("switchboard stopped");
    Ok(())
}

/// Assemble supervisors, the vault session and source pollers.
fn build_orchestrator(
    config: &Config,
    data_dir: &Path,
    credentials: &Credentials,
) -> anyhow::Result<Orchestrator> {
    let mut orchestrator = Orchestrator::new();
    let supervisor_config = config.supervisor_config(data_dir);

    for tool in &config.tools {
        orchestrator.add_process(ProcessSupervisor::new(
            tool.clone(),
            supervisor_config.clone(),
        ))?;
    }

    if config.vault.enabled {
        let vault_credentials = credentials
            .vault()
            .context("vault is enabled but its credentials are incomplete")?;
        let program = resolve_executable(&config.vault.command, &supervisor_config.tools_dir)
            .unwrap_or_else(|| PathBuf::from(&config.vault.command));
        let runner = ProcessRunner::new(
            program,
            config.vault.state_dir_env.clone(),
            config.vault.session_env.clone(),
        )?
        .with_base_args(vec!["--nointeraction".to_owned()])
        .with_max_output_bytes(config.vault.max_output_bytes);
        if let Some(blob) = credentials.get(VAULT_SESSION_BLOB) {
            credentials::write_session_blob(blob, runner.state_dir())?;
        }
        let queue = Arc::new(CommandQueue::new(
            Arc::new(runner),
            Duration::from_secs(config.vault.timeout_secs),
        ));
        orchestrator.set_vault(VaultSession::new(
            queue,
            vault_credentials,
            Duration::from_secs(config.vault.sync_interval_secs),
            config.vault.server_url.clone(),
        ));
    }

    let Some(url) = config.forward.url.as_deref() else {
        return Ok(orchestrator);
    };
    let token = config.forward.token_env.as_deref().and_then(|key| {
        credentials
            .get(key)
            .map(str::to_owned)
            .or_else(|| std::env::var(key).ok())
    });
    let forwarder: Arc<dyn Forwarder> = Arc::new(
        WebhookForwarder::new(url, Duration::from_secs(config.forward.timeout_secs))
            .with_token(token),
    );

    for feed in &config.feeds {
        let job = FeedPoll::new(
            feed.name.clone(),
            Arc::new(HttpFeedFetcher::new(feed.name.clone(), feed.url.clone())),
            Arc::clone(&forwarder),
            feed.seen_cap,
            feed.seen_keep,
        );
        orchestrator.add_poller(
            PollerSpec::new(
                feed.name.clone(),
                Duration::from_secs(feed.interval_secs),
                Arc::new(job),
            )
            .run_immediately(feed.run_immediately),
        )?;
    }

    for source in &config.channels {
        let mut job = ChannelPoll::new(
            source.name.clone(),
            Arc::new(HttpChannelFetcher::new(source.name.clone(), source.base_url.clone())),
            Arc::clone(&forwarder),
            source.batch_limit,
        );
        if let Some(ids) = &source.channel_ids {
            job = job.with_channels(ids.clone());
        }
        orchestrator.add_poller(
            PollerSpec::new(
                source.name.clone(),
                Duration::from_secs(source.interval_secs),
                Arc::new(job),
            )
            .run_immediately(source.run_immediately),
        )?;
    }

    Ok(orchestrator)
}

/// Write `health.json` on a fixed interval through the scheduler.
fn register_health_writer(
    orchestrator: &Arc<Orchestrator>,
    config: &Config,
    path: PathBuf,
) -> anyhow::Result<()> {
    let weak = Arc::downgrade(orchestrator);
    let job = poll_fn(move || {
        let weak = weak.clone();
        let path = path.clone();
        async move {
            if let Some(orchestrator) = weak.upgrade() {
                write_health_file(&orchestrator.health(), &path).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
    });
    orchestrator.add_poller(
        PollerSpec::new(
            "health",
            Duration::from_secs(config.runtime.health_interval_secs),
            Arc::new(job),
        )
        .run_immediately(true),
    )?;
    Ok(())
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("received shutdown signal, initiating graceful shutdown");
    Ok(())
}

/// Validate the configuration and print a summary.
fn handle_check(path: &Path) -> anyhow::Result<()> {
    switchboard::logging::init_cli();

    let config = load_validated(path)?;
    let data_dir = config.data_dir()?;
    let supervisor = config.supervisor_config(&data_dir);

    println!("config:    {}", path.display());
    println!("data dir:  {}", data_dir.display());
    println!("tools dir: {}", supervisor.tools_dir.display());
    for tool in &config.tools {
        let resolved = resolve_executable(&tool.command, &supervisor.tools_dir);
        match resolved {
            Some(program) => println!("tool {:<20} {}", tool.name, program.display()),
            None => println!("tool {:<20} NOT FOUND ({})", tool.name, tool.command),
        }
    }
    println!(
        "vault:     {}",
        if config.vault.enabled { "enabled" } else { "disabled" }
    );
    println!("feeds:     {}", config.feeds.len());
    println!("channels:  {}", config.channels.len());
    println!("forward:   {}", config.forward.url.as_deref().unwrap_or("-"));
    println!("ok");
    Ok(())
}

/// Print the last health report written by a running instance.
fn handle_health(path: &Path) -> anyhow::Result<()> {
    switchboard::logging::init_cli();

    let config = load_config(path)?;
    let health_path = config.data_dir()?.join(HEALTH_FILE);
    let report = read_health_file(&health_path)?;
    let json = serde_json::to_string_pretty(&report).context("failed to format health report")?;
    println!("{json}");
    Ok(())
}
