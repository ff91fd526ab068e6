//! Background job scheduling and execution.
//!
//! Every registered job runs on its own timer. Runs of the same job never
//! overlap, and all runs observe one shared shutdown token.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use scheduler::{create_scheduler, JobScheduler, SHUTDOWN_GRACE_PERIOD};
