//! Client-side progress polling.
//!
//! Every polled job gets its own task with its own interval. The interval
//! grows by `backoff_factor` after each poll and snaps back to
//! `initial_interval` whenever the job's status changes. A job whose status
//! has not changed for `no_progress_timeout` is reported as timed out and no
//! longer polled. Fetch errors never stop polling; they are reported and fall
//! under the same timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::job::{JobSnapshot, JobStatus};
use crate::store::{JobStore, StoreError};

use super::queue::QueueItem;

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub no_progress_timeout: Duration,
}

impl PollerConfig {
    pub fn from_config(config: &Config) -> Self {
        let settings = &config.poller;
        Self {
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            backoff_factor: settings.backoff_factor,
            no_progress_timeout: Duration::from_millis(settings.no_progress_timeout_ms),
        }
    }

    fn grow(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.backoff_factor).min(self.max_interval)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Notifications produced by the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    StatusChanged {
        job_id: String,
        snapshot: JobSnapshot,
    },
    FetchFailed {
        job_id: String,
        error: String,
        consecutive_errors: u32,
    },
    /// No status change within the no-progress timeout. The job should be
    /// shown as failed; the server-side record is left alone.
    TimedOut {
        job_id: String,
        last_status: Option<JobStatus>,
    },
}

impl PollEvent {
    pub fn job_id(&self) -> &str {
        match self {
            PollEvent::StatusChanged { job_id, .. }
            | PollEvent::FetchFailed { job_id, .. }
            | PollEvent::TimedOut { job_id, .. } => job_id,
        }
    }
}

/// Read access to job state, as seen by a client.
#[async_trait]
pub trait JobFetcher: Send + Sync {
    async fn fetch(&self, job_id: &str) -> Result<JobSnapshot, StoreError>;
}

#[async_trait]
impl<T: JobStore + ?Sized> JobFetcher for T {
    async fn fetch(&self, job_id: &str) -> Result<JobSnapshot, StoreError> {
        self.get(job_id)
            .await?
            .map(|job| job.snapshot())
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }
}

/// What to do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Poll again after the given delay.
    Wait(Duration),
    /// The job reached a terminal status.
    Finished,
    /// The no-progress timeout elapsed.
    TimedOut,
}

/// Per-job polling state. Pure: time is passed in.
#[derive(Debug, Clone)]
pub struct PollState {
    interval: Duration,
    consecutive_errors: u32,
    last_status: Option<JobStatus>,
    last_progress_at: Instant,
}

impl PollState {
    pub fn new(config: &PollerConfig, known_status: Option<JobStatus>, now: Instant) -> Self {
        Self {
            interval: config.initial_interval,
            consecutive_errors: 0,
            last_status: known_status,
            last_progress_at: now,
        }
    }

    pub fn last_status(&self) -> Option<JobStatus> {
        self.last_status
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records a successful fetch. Returns true when the status changed.
    pub fn observe(&mut self, config: &PollerConfig, status: JobStatus, now: Instant) -> bool {
        self.consecutive_errors = 0;
        if self.last_status == Some(status) {
            return false;
        }
        self.last_status = Some(status);
        self.last_progress_at = now;
        self.interval = config.initial_interval;
        true
    }

    /// Records a failed fetch and returns the error streak.
    pub fn record_error(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    /// Decides the next step and advances the backoff.
    ///
    /// The wait never overshoots the no-progress deadline, so the last poll
    /// lands on it.
    pub fn next(&mut self, config: &PollerConfig, now: Instant) -> PollDecision {
        if self.last_status.is_some_and(JobStatus::is_terminal) {
            return PollDecision::Finished;
        }

        let deadline = self.last_progress_at + config.no_progress_timeout;
        if now >= deadline {
            return PollDecision::TimedOut;
        }

        let wait = self.interval.min(deadline - now);
        self.interval = config.grow(self.interval);
        PollDecision::Wait(wait)
    }
}

struct PollTask {
    generation: u64,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<String, PollTask>>>;

fn lock(tasks: &Mutex<HashMap<String, PollTask>>) -> MutexGuard<'_, HashMap<String, PollTask>> {
    tasks.lock().unwrap_or_else(|poisoned| {
        warn!("Poller task map lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Owns one polling task per job.
pub struct ProgressPoller<F: JobFetcher + ?Sized + 'static> {
    fetcher: Arc<F>,
    config: PollerConfig,
    events: mpsc::UnboundedSender<PollEvent>,
    tasks: TaskMap,
    enabled: AtomicBool,
    next_generation: AtomicU64,
}

impl<F: JobFetcher + ?Sized + 'static> ProgressPoller<F> {
    /// Creates an enabled poller and the receiver its events go to.
    pub fn new(fetcher: Arc<F>, config: PollerConfig) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let poller = Self {
            fetcher,
            config,
            events,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            enabled: AtomicBool::new(true),
            next_generation: AtomicU64::new(0),
        };
        (poller, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.tasks).contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Starts polling `job_id` unless it is already polled, known to be
    /// terminal, or the poller is disabled. Returns whether a task started.
    pub fn start(&self, job_id: &str, known_status: Option<JobStatus>) -> bool {
        if !self.is_enabled() || known_status.is_some_and(JobStatus::is_terminal) {
            return false;
        }

        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(job_id) {
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(poll_job(
            self.fetcher.clone(),
            self.config.clone(),
            job_id.to_string(),
            known_status,
            self.events.clone(),
            self.tasks.clone(),
            generation,
        ));
        tasks.insert(job_id.to_string(), PollTask { generation, handle });
        debug!(job_id, "Started polling");
        true
    }

    /// Stops polling `job_id`. Other jobs are unaffected.
    pub fn stop(&self, job_id: &str) -> bool {
        match lock(&self.tasks).remove(job_id) {
            Some(task) => {
                task.handle.abort();
                debug!(job_id, "Stopped polling");
                true
            }
            None => false,
        }
    }

    /// Polls exactly the queue items flagged for polling that are not
    /// terminal, starting and stopping tasks as needed.
    pub fn sync(&self, items: &[QueueItem]) {
        let wanted: HashMap<&str, JobStatus> = items
            .iter()
            .filter(|item| item.is_polling && !item.status.is_terminal())
            .map(|item| (item.id.as_str(), item.status))
            .collect();

        let stale: Vec<String> = lock(&self.tasks)
            .keys()
            .filter(|id| !wanted.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.stop(&id);
        }

        for (id, status) in wanted {
            self.start(id, Some(status));
        }
    }

    /// Enabling resumes nothing by itself; disabling stops every task.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop_all();
        }
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    /// Stops every task. The poller stays usable.
    pub fn stop_all(&self) {
        for (_, task) in lock(&self.tasks).drain() {
            task.handle.abort();
        }
    }

    /// Stops every task and disables the poller for good.
    pub fn dispose(&self) {
        self.disable();
    }
}

impl<F: JobFetcher + ?Sized + 'static> Drop for ProgressPoller<F> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn poll_job<F: JobFetcher + ?Sized>(
    fetcher: Arc<F>,
    config: PollerConfig,
    job_id: String,
    known_status: Option<JobStatus>,
    events: mpsc::UnboundedSender<PollEvent>,
    tasks: TaskMap,
    generation: u64,
) {
    let mut state = PollState::new(&config, known_status, Instant::now());

    loop {
        match fetcher.fetch(&job_id).await {
            Ok(snapshot) => {
                if state.observe(&config, snapshot.status, Instant::now()) {
                    debug!(job_id = %job_id, status = %snapshot.status, "Status changed");
                    let _ = events.send(PollEvent::StatusChanged {
                        job_id: job_id.clone(),
                        snapshot,
                    });
                }
            }
            Err(e) => {
                let consecutive_errors = state.record_error();
                debug!(job_id = %job_id, consecutive_errors, "Poll failed: {}", e);
                let _ = events.send(PollEvent::FetchFailed {
                    job_id: job_id.clone(),
                    error: e.to_string(),
                    consecutive_errors,
                });
            }
        }

        match state.next(&config, Instant::now()) {
            PollDecision::Wait(delay) => sleep(delay).await,
            PollDecision::Finished => break,
            PollDecision::TimedOut => {
                warn!(
                    job_id = %job_id,
                    "No progress for {:?}, giving up",
                    config.no_progress_timeout
                );
                let _ = events.send(PollEvent::TimedOut {
                    job_id: job_id.clone(),
                    last_status: state.last_status(),
                });
                break;
            }
        }
    }

    let mut tasks = lock(&tasks);
    if tasks.get(&job_id).map(|t| t.generation) == Some(generation) {
        tasks.remove(&job_id);
    }
}
