use super::context::JobContext;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// When a job runs: every `interval`, and optionally once right at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub interval: Duration,
    pub run_on_startup: bool,
}

impl JobSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            run_on_startup: false,
        }
    }

    pub fn on_startup(mut self, run_on_startup: bool) -> Self {
        self.run_on_startup = run_on_startup;
        self
    }
}

/// Errors that can occur during job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Dependencies and settings are handed to the job at construction; the
/// scheduler only supplies a [`JobContext`] per run.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    /// Execute one run of the job.
    ///
    /// Implementations check `ctx.is_cancelled()` between units of work and
    /// return `JobError::Cancelled` when set. The returned value is a short
    /// JSON summary of what the run did.
    async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_builder() {
        let schedule = JobSchedule::every(Duration::from_secs(60));
        assert!(!schedule.run_on_startup);
        assert!(schedule.on_startup(true).run_on_startup);
    }

    #[test]
    fn test_job_error_display() {
        assert_eq!(JobError::AlreadyRunning.to_string(), "Job is already running");
        assert_eq!(
            JobError::ExecutionFailed("disk full".to_string()).to_string(),
            "Execution failed: disk full"
        );
    }
}
