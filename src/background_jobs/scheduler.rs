use super::context::JobContext;
use super::handle::{JobRuntime, RegisteredJob, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError};
use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for in-flight runs to observe cancellation.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Runs every registered job on its own timer.
///
/// Each job gets an independent loop; a tick that arrives while the previous
/// run of the same job is still going is dropped and counted, never queued.
pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown. Runs get child tokens of it.
    shutdown_token: CancellationToken,

    /// Timer loops and job runs, awaited on shutdown.
    tasks: TaskTracker,

    grace_period: Duration,
}

impl JobScheduler {
    pub fn new(
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            command_receiver,
            shutdown_token,
            tasks: TaskTracker::new(),
            grace_period: SHUTDOWN_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Register a job with the scheduler. Registering the same id twice
    /// replaces the earlier job.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(
            job_id,
            RegisteredJob {
                job,
                runtime: Arc::new(JobRuntime::default()),
            },
        );
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns after shutdown has completed.
    pub async fn run(&mut self) {
        let jobs: Vec<RegisteredJob> = {
            let state = self.shared_state.read().await;
            state.jobs.values().cloned().collect()
        };
        info!("Starting job scheduler with {} registered jobs", jobs.len());

        for entry in jobs {
            let token = self.shutdown_token.clone();
            let tasks = self.tasks.clone();
            self.tasks.spawn(timer_loop(entry, token, tasks));
        }

        loop {
            tokio::select! {
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let entry = {
            let state = self.shared_state.read().await;
            state.jobs.get(job_id).cloned().ok_or(JobError::NotFound)?
        };
        start_run(&entry, &self.shutdown_token, &self.tasks, "manual")
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");
        self.tasks.close();
        if tokio::time::timeout(self.grace_period, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                "{} background tasks still running after {:?}, abandoning them",
                self.tasks.len(),
                self.grace_period
            );
        }
        info!("Scheduler shutdown complete");
    }
}

/// Tick loop of one job. The first tick fires immediately when the job runs
/// on startup, otherwise one interval after the scheduler starts.
async fn timer_loop(entry: RegisteredJob, shutdown_token: CancellationToken, tasks: TaskTracker) {
    let job_id = entry.job.id();
    let schedule = entry.job.schedule();
    if schedule.interval.is_zero() {
        error!("Job {} has a zero interval, not scheduling it", job_id);
        return;
    }

    let start = if schedule.run_on_startup {
        tokio::time::Instant::now()
    } else {
        tokio::time::Instant::now() + schedule.interval
    };
    let mut ticker = tokio::time::interval_at(start, schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                match start_run(&entry, &shutdown_token, &tasks, "schedule") {
                    Ok(()) => {}
                    Err(JobError::AlreadyRunning) => {
                        let skipped = entry.runtime.record_skipped_tick();
                        metrics::record_skipped_tick(job_id);
                        debug!(
                            "Job {} still running, dropping tick ({} dropped so far)",
                            job_id, skipped
                        );
                    }
                    Err(e) => warn!("Could not start job {}: {}", job_id, e),
                }
            }
        }
    }
    debug!("Timer loop for job {} stopped", job_id);
}

/// Claim the job's overlap guard and spawn one run.
fn start_run(
    entry: &RegisteredJob,
    shutdown_token: &CancellationToken,
    tasks: &TaskTracker,
    triggered_by: &'static str,
) -> Result<(), JobError> {
    if shutdown_token.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    if !entry.runtime.try_begin() {
        return Err(JobError::AlreadyRunning);
    }

    let job = Arc::clone(&entry.job);
    let runtime = Arc::clone(&entry.runtime);
    let ctx = JobContext::new(shutdown_token.child_token(), triggered_by);
    let job_id = job.id();
    info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);
    metrics::set_background_job_running(job_id, true);

    tasks.spawn(async move {
        let start_time = Instant::now();
        // Run in its own task so a panic surfaces as a JoinError instead of
        // unwinding through the scheduler.
        let result = tokio::spawn(async move { job.execute(&ctx).await }).await;
        let elapsed = start_time.elapsed();

        let (outcome, status_label) = match result {
            Ok(Ok(report)) => {
                info!("Job {} completed successfully in {:?}", job_id, elapsed);
                (Ok(report), "success")
            }
            Ok(Err(JobError::Cancelled)) => {
                info!("Job {} was cancelled after {:?}", job_id, elapsed);
                (Err(JobError::Cancelled.to_string()), "cancelled")
            }
            Ok(Err(e)) => {
                error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
                (Err(e.to_string()), "failed")
            }
            Err(e) => {
                error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
                (Err(format!("Task panic: {}", e)), "panic")
            }
        };

        metrics::record_background_job_execution(job_id, status_label, elapsed);
        metrics::set_background_job_running(job_id, false);
        runtime.finish(outcome);
    });
    Ok(())
}

/// Create a scheduler and its handle.
pub fn create_scheduler(shutdown_token: CancellationToken) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let scheduler = JobScheduler::new(command_rx, shutdown_token, Arc::clone(&shared_state));
    let handle = SchedulerHandle::new(command_tx, shared_state);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::JobSchedule;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        work: Duration,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                work: Duration::ZERO,
                execution_count: Arc::new(AtomicUsize::new(0)),
                should_fail: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule
        }

        async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError> {
            let run = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
            if !ctx.pause(self.work).await {
                return Err(JobError::Cancelled);
            }
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(json!({ "run": run }))
            }
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl BackgroundJob for PanickingJob {
        fn id(&self) -> &'static str {
            "panicking_job"
        }
        fn name(&self) -> &'static str {
            "Panicking Job"
        }
        fn description(&self) -> &'static str {
            "Always panics"
        }
        fn schedule(&self) -> JobSchedule {
            JobSchedule::every(Duration::from_secs(3600))
        }
        async fn execute(&self, _ctx: &JobContext) -> Result<JsonValue, JobError> {
            panic!("job exploded");
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_register_job() {
        let (mut scheduler, handle) = create_scheduler(CancellationToken::new());

        scheduler
            .register_job(Arc::new(TestJob::new(
                "test_job",
                JobSchedule::every(Duration::from_secs(60)),
            )))
            .await;

        let jobs = handle.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "test_job");
        assert_eq!(jobs[0].interval_secs, 60);
        assert!(!jobs[0].is_running);
        assert_eq!(scheduler.job_count().await, 1);
        assert!(handle.job_exists("test_job").await);
        assert!(handle.get_job("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_run_on_startup_fires_immediately() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let job = TestJob::new(
            "startup_job",
            JobSchedule::every(Duration::from_secs(3600)).on_startup(true),
        );
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });
        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = handle.get_job("startup_job").await.unwrap();
        assert_eq!(info.run_count, 1);
        assert_eq!(info.last_report, Some(json!({"run": 1})));
        assert!(info.last_error.is_none());

        shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), sched)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_without_startup_waits_one_interval() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, _handle) = create_scheduler(shutdown_token.clone());
        let job = TestJob::new("lazy_job", JobSchedule::every(Duration::from_millis(300)));
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        wait_until(|| count.load(Ordering::SeqCst) >= 1).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched).await;
    }

    #[tokio::test]
    async fn test_overlapping_ticks_are_dropped() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let mut job = TestJob::new(
            "slow_job",
            JobSchedule::every(Duration::from_millis(50)).on_startup(true),
        );
        job.work = Duration::from_millis(400);
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Several ticks have fired during the first run; none started a second one
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_job_running("slow_job").await);
        let info = handle.get_job("slow_job").await.unwrap();
        assert!(info.skipped_ticks >= 2);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched).await;
    }

    #[tokio::test]
    async fn test_trigger_job() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let mut job = TestJob::new("manual_job", JobSchedule::every(Duration::from_secs(3600)));
        job.work = Duration::from_millis(200);
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });

        handle.trigger_job("manual_job").await.unwrap();
        assert_eq!(
            handle.trigger_job("manual_job").await,
            Err(JobError::AlreadyRunning)
        );
        assert_eq!(
            handle.trigger_job("no_such_job").await,
            Err(JobError::NotFound)
        );

        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_job_running("manual_job").await);
        handle.trigger_job("manual_job").await.unwrap();
        wait_until(|| count.load(Ordering::SeqCst) == 2).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched).await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error_and_keeps_schedule() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let job = TestJob::new(
            "failing_job",
            JobSchedule::every(Duration::from_millis(100)).on_startup(true),
        );
        job.should_fail.store(true, Ordering::SeqCst);
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });
        wait_until(|| count.load(Ordering::SeqCst) >= 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let info = handle.get_job("failing_job").await.unwrap();
        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            info.last_error.as_deref(),
            Some("Execution failed: Test failure")
        );

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched).await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_scheduler() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let healthy = TestJob::new("healthy_job", JobSchedule::every(Duration::from_secs(3600)));
        let healthy_count = healthy.execution_count.clone();
        scheduler.register_job(Arc::new(PanickingJob)).await;
        scheduler.register_job(Arc::new(healthy)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });

        handle.trigger_job("panicking_job").await.unwrap();
        let mut info = handle.get_job("panicking_job").await.unwrap();
        for _ in 0..100 {
            if info.run_count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            info = handle.get_job("panicking_job").await.unwrap();
        }
        assert!(!info.is_running);
        assert!(info
            .last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("Task panic")));

        // Both the panicking job and its neighbours can still run
        handle.trigger_job("panicking_job").await.unwrap();
        handle.trigger_job("healthy_job").await.unwrap();
        wait_until(|| healthy_count.load(Ordering::SeqCst) == 1).await;
        assert_eq!(healthy_count.load(Ordering::SeqCst), 1);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched).await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
        let mut job = TestJob::new(
            "long_job",
            JobSchedule::every(Duration::from_secs(3600)).on_startup(true),
        );
        job.work = Duration::from_secs(3600);
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched = tokio::spawn(async move { scheduler.run().await });
        wait_until(|| count.load(Ordering::SeqCst) == 1).await;

        let started = Instant::now();
        shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), sched)
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let info = handle.get_job("long_job").await.unwrap();
        assert!(!info.is_running);
        assert_eq!(info.last_error.as_deref(), Some("Job was cancelled"));
    }
}
