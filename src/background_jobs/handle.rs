use super::job::{BackgroundJob, JobError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub interval_secs: u64,
    pub run_on_startup: bool,
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<JsonValue>,
    pub run_count: u64,
    pub skipped_ticks: u64,
}

#[derive(Debug, Default)]
struct LastRun {
    at: Option<DateTime<Utc>>,
    error: Option<String>,
    report: Option<JsonValue>,
}

/// Live schedule state of one job.
///
/// `running` is the overlap guard: it is set for exactly the duration of one
/// run, and a tick or trigger that finds it set is rejected.
#[derive(Debug, Default)]
pub struct JobRuntime {
    running: AtomicBool,
    run_count: AtomicU64,
    skipped_ticks: AtomicU64,
    last_run: Mutex<LastRun>,
}

impl JobRuntime {
    /// Claim the job for a run. Returns false if a run is already in progress.
    pub fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the outcome of a run and release the guard.
    pub fn finish(&self, outcome: Result<JsonValue, String>) {
        {
            let mut last = self
                .last_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            last.at = Some(Utc::now());
            match outcome {
                Ok(report) => {
                    last.error = None;
                    last.report = Some(report);
                }
                Err(error) => last.error = Some(error),
            }
        }
        self.run_count.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::Release);
    }

    pub fn record_skipped_tick(&self) -> u64 {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A job together with its runtime state.
#[derive(Clone)]
pub struct RegisteredJob {
    pub job: Arc<dyn BackgroundJob>,
    pub runtime: Arc<JobRuntime>,
}

impl RegisteredJob {
    fn info(&self) -> JobInfo {
        let schedule = self.job.schedule();
        let last = self
            .runtime
            .last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        JobInfo {
            id: self.job.id().to_string(),
            name: self.job.name().to_string(),
            description: self.job.description().to_string(),
            interval_secs: schedule.interval.as_secs(),
            run_on_startup: schedule.run_on_startup,
            is_running: self.runtime.is_running(),
            last_run_at: last.at,
            last_error: last.error.clone(),
            last_report: last.report.clone(),
            run_count: self.runtime.run_count.load(Ordering::Relaxed),
            skipped_ticks: self.runtime.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    pub jobs: HashMap<String, RegisteredJob>,
}

/// Cloneable handle to inspect and trigger jobs while the scheduler runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
        }
    }

    /// All registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state.jobs.values().map(RegisteredJob::info).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state.jobs.get(job_id).map(RegisteredJob::info)
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|entry| entry.runtime.is_running())
            .unwrap_or(false)
    }

    pub async fn job_exists(&self, job_id: &str) -> bool {
        self.shared_state.read().await.jobs.contains_key(job_id)
    }

    /// Start a run of `job_id` now, outside its schedule.
    ///
    /// Returns `AlreadyRunning` if a run is in progress; the request is not queued.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }
}
