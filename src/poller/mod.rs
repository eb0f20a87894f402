//! Named, independently scheduled recurring jobs.
//!
//! Each registered poller owns a free-running Tokio interval. Every tick
//! spawns the job as its own task, so a slow job never delays the clock:
//! back-to-back or overlapping runs of the same job are possible and jobs
//! must tolerate them. A failing run is recorded in the poller's status and
//! reported to its error hook; the timer keeps going.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Longest period a timer runs with; longer intervals are clamped so tick
/// deadlines never overflow [`Instant`].
pub const MAX_TIMER_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Build a free-running interval whose first tick is one period from now.
///
/// `period` must be non-zero.
pub(crate) fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let period = period.min(MAX_TIMER_PERIOD);
    let now = Instant::now();
    let start = now.checked_add(period).unwrap_or(now);
    tokio::time::interval_at(start, period)
}

/// Errors raised while configuring the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A poller with this name is already registered.
    #[error("poller '{0}' is already registered")]
    Duplicate(String),
    /// The interval must be non-zero.
    #[error("poller '{0}' has a zero interval")]
    ZeroInterval(String),
}

/// A recurring unit of work.
#[async_trait]
pub trait PollJob: Send + Sync {
    /// Run one poll. Errors are recorded, never propagated to the timer.
    async fn poll(&self) -> anyhow::Result<()>;
}

type BoxedPoll = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Adapter turning an async closure into a [`PollJob`].
pub struct FnJob<F>(F);

/// Wrap an async closure as a [`PollJob`].
pub fn poll_fn<F, Fut>(f: F) -> FnJob<impl Fn() -> BoxedPoll + Send + Sync>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnJob(move || -> BoxedPoll { Box::pin(f()) })
}

#[async_trait]
impl<F> PollJob for FnJob<F>
where
    F: Fn() -> BoxedPoll + Send + Sync,
{
    async fn poll(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Callback invoked with the poller name and the error of a failed run.
pub type ErrorHook = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Registration parameters for one poller.
pub struct PollerSpec {
    name: String,
    interval: Duration,
    job: Arc<dyn PollJob>,
    run_immediately: bool,
    on_error: Option<ErrorHook>,
}

impl PollerSpec {
    /// Describe a poller running `job` every `interval`.
    pub fn new(name: impl Into<String>, interval: Duration, job: Arc<dyn PollJob>) -> Self {
        Self {
            name: name.into(),
            interval,
            job,
            run_immediately: false,
            on_error: None,
        }
    }

    /// Run once as soon as the poller starts, before the first tick.
    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }

    /// Install a hook called after every failed run.
    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }
}

/// Point-in-time view of a poller, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    /// Poller name.
    pub name: String,
    /// Whether the timer is active.
    pub running: bool,
    /// Completion time of the last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// Error of the most recent run, cleared by the next success.
    pub last_error: Option<String>,
    /// Number of successful runs.
    pub run_count: u64,
}

#[derive(Debug, Default)]
struct RunRecord {
    run_count: u64,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Poller {
    name: String,
    interval: Duration,
    run_immediately: bool,
    job: Arc<dyn PollJob>,
    on_error: Option<ErrorHook>,
    record: Mutex<RunRecord>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Poller {
    async fn run_once(&self) {
        debug!(poller = %self.name, "poll started");
        match self.job.poll().await {
            Ok(()) => {
                let mut record = lock(&self.record);
                record.run_count = record.run_count.saturating_add(1);
                record.last_run = Some(Utc::now());
                record.last_error = None;
            }
            Err(e) => {
                warn!(poller = %self.name, error = %e, "poll failed");
                lock(&self.record).last_error = Some(format!("{e:#}"));
                if let Some(hook) = &self.on_error {
                    hook(&self.name, &e);
                }
            }
        }
    }
}

/// Handle to a registered poller.
#[derive(Clone)]
pub struct PollerHandle {
    poller: Arc<Poller>,
}

impl PollerHandle {
    /// Poller name.
    pub fn name(&self) -> &str {
        &self.poller.name
    }

    /// Start the timer. Calling `start` on a running poller does nothing.
    pub fn start(&self) {
        let mut timer = lock(&self.poller.timer);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let poller = Arc::clone(&self.poller);
        *timer = Some(tokio::spawn(async move {
            if poller.run_immediately {
                let first = Arc::clone(&poller);
                tokio::spawn(async move { first.run_once().await });
            }

            let mut ticker = delayed_interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                let run = Arc::clone(&poller);
                tokio::spawn(async move { run.run_once().await });
            }
        }));
        info!(
            poller = %self.poller.name,
            interval_ms = u64::try_from(self.poller.interval.as_millis()).unwrap_or(u64::MAX),
            run_immediately = self.poller.run_immediately,
            "poller started"
        );
    }

    /// Cancel the timer. Safe to call repeatedly or before `start`.
    ///
    /// A run already in flight is left to finish.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.poller.timer).take() {
            handle.abort();
            info!(poller = %self.poller.name, "poller stopped");
        }
    }

    /// Run the job once now, independent of the timer.
    pub async fn trigger(&self) {
        self.poller.run_once().await;
    }

    /// Snapshot of the poller's state.
    pub fn status(&self) -> PollerStatus {
        let running = lock(&self.poller.timer)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        let record = lock(&self.poller.record);
        PollerStatus {
            name: self.poller.name.clone(),
            running,
            last_run: record.last_run,
            last_error: record.last_error.clone(),
            run_count: record.run_count,
        }
    }
}

/// Registry of pollers keyed by unique name.
#[derive(Default)]
pub struct PollScheduler {
    pollers: Mutex<BTreeMap<String, PollerHandle>>,
}

impl PollScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a poller. It does not run until started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Duplicate`] if the name is taken and
    /// [`SchedulerError::ZeroInterval`] for a zero interval.
    pub fn register(&self, spec: PollerSpec) -> Result<PollerHandle, SchedulerError> {
        if spec.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(spec.name));
        }
        let mut pollers = lock(&self.pollers);
        if pollers.contains_key(&spec.name) {
            return Err(SchedulerError::Duplicate(spec.name));
        }

        let handle = PollerHandle {
            poller: Arc::new(Poller {
                name: spec.name.clone(),
                interval: spec.interval,
                run_immediately: spec.run_immediately,
                job: spec.job,
                on_error: spec.on_error,
                record: Mutex::new(RunRecord::default()),
                timer: Mutex::new(None),
            }),
        };
        pollers.insert(spec.name, handle.clone());
        Ok(handle)
    }

    /// Look up a registered poller.
    pub fn get(&self, name: &str) -> Option<PollerHandle> {
        lock(&self.pollers).get(name).cloned()
    }

    /// Start every registered poller.
    pub fn start_all(&self) {
        for handle in self.handles() {
            handle.start();
        }
    }

    /// Stop every registered poller.
    pub fn stop_all(&self) {
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Status of every poller, ordered by name.
    pub fn statuses(&self) -> Vec<PollerStatus> {
        self.handles().iter().map(PollerHandle::status).collect()
    }

    /// Number of registered pollers.
    pub fn len(&self) -> usize {
        lock(&self.pollers).len()
    }

    /// Whether no poller is registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.pollers).is_empty()
    }

    fn handles(&self) -> Vec<PollerHandle> {
        lock(&self.pollers).values().cloned().collect()
    }
}
