//! Periodic storage hygiene.
//!
//! Sub-tasks run in a fixed order (orphans, compression, statistics, temp
//! files, vacuum). A failing sub-task is recorded in the report and the rest
//! still run.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::config::DatabaseMaintenanceSettings;
use crate::library_store::MaintenanceStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubtaskOutcome {
    Completed { affected: usize },
    Failed { error: String },
    Skipped,
}

impl SubtaskOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SubtaskOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub orphaned_records: SubtaskOutcome,
    pub data_compression: SubtaskOutcome,
    pub statistics_update: SubtaskOutcome,
    pub temp_file_cleanup: SubtaskOutcome,
    pub vacuum: SubtaskOutcome,
}

impl MaintenanceReport {
    pub fn failures(&self) -> usize {
        [
            &self.orphaned_records,
            &self.data_compression,
            &self.statistics_update,
            &self.temp_file_cleanup,
            &self.vacuum,
        ]
        .iter()
        .filter(|outcome| outcome.is_failed())
        .count()
    }
}

pub struct DatabaseMaintenanceJob {
    store: Arc<dyn MaintenanceStore>,
    temp_dir: PathBuf,
    settings: DatabaseMaintenanceSettings,
}

impl DatabaseMaintenanceJob {
    pub fn new(
        store: Arc<dyn MaintenanceStore>,
        temp_dir: PathBuf,
        settings: DatabaseMaintenanceSettings,
    ) -> Self {
        Self {
            store,
            temp_dir,
            settings,
        }
    }

    pub async fn run_maintenance(&self, ctx: &JobContext) -> Result<MaintenanceReport, JobError> {
        let store = Arc::clone(&self.store);
        let orphaned_records = run_subtask(
            "orphaned record cleanup",
            self.settings.enable_orphaned_record_cleanup,
            ctx,
            move || store.delete_orphaned_records().map_err(|e| e.to_string()),
        )
        .await?;

        let store = Arc::clone(&self.store);
        let cutoff = chrono::Duration::from_std(self.settings.data_compression_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let data_compression = run_subtask(
            "data compression",
            self.settings.enable_data_compression,
            ctx,
            move || {
                let cutoff = cutoff.ok_or_else(|| "compression age out of range".to_string())?;
                store
                    .compress_records_older_than(cutoff)
                    .map_err(|e| e.to_string())
            },
        )
        .await?;

        let store = Arc::clone(&self.store);
        let statistics_update = run_subtask(
            "statistics update",
            self.settings.enable_statistics_update,
            ctx,
            move || store.update_statistics().map(|_| 0).map_err(|e| e.to_string()),
        )
        .await?;

        let temp_dir = self.temp_dir.clone();
        let max_age = self.settings.temp_file_age;
        let temp_file_cleanup = run_subtask(
            "temp file cleanup",
            self.settings.enable_temp_file_cleanup,
            ctx,
            move || cleanup_temp_files(&temp_dir, max_age).map_err(|e| e.to_string()),
        )
        .await?;

        let store = Arc::clone(&self.store);
        let timeout = self.settings.vacuum_lock_timeout;
        let vacuum = run_subtask("vacuum", self.settings.enable_vacuum, ctx, move || {
            store.vacuum(timeout).map(|_| 0).map_err(|e| e.to_string())
        })
        .await?;

        Ok(MaintenanceReport {
            orphaned_records,
            data_compression,
            statistics_update,
            temp_file_cleanup,
            vacuum,
        })
    }
}

async fn run_subtask<F>(
    name: &str,
    enabled: bool,
    ctx: &JobContext,
    work: F,
) -> Result<SubtaskOutcome, JobError>
where
    F: FnOnce() -> Result<usize, String> + Send + 'static,
{
    if ctx.is_cancelled() {
        info!("Maintenance cancelled before {}", name);
        return Err(JobError::Cancelled);
    }
    if !enabled {
        return Ok(SubtaskOutcome::Skipped);
    }

    let outcome = match tokio::task::spawn_blocking(work).await {
        Ok(Ok(affected)) => {
            debug!("Maintenance {}: {} affected", name, affected);
            SubtaskOutcome::Completed { affected }
        }
        Ok(Err(error)) => {
            warn!("Maintenance {} failed: {}", name, error);
            SubtaskOutcome::Failed { error }
        }
        Err(e) => {
            warn!("Maintenance {} task failed: {}", name, e);
            SubtaskOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    Ok(outcome)
}

/// Delete regular files under `dir` last modified more than `max_age` ago.
/// A missing directory counts as nothing to delete.
pub fn cleanup_temp_files(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    std::fs::read_dir(dir)?;

    let now = SystemTime::now();
    let mut deleted = 0;
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping temp entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete temp file {:?}: {}", entry.path(), e),
            }
        }
    }
    Ok(deleted)
}

#[async_trait]
impl BackgroundJob for DatabaseMaintenanceJob {
    fn id(&self) -> &'static str {
        "database_maintenance"
    }

    fn name(&self) -> &'static str {
        "Database Maintenance"
    }

    fn description(&self) -> &'static str {
        "Clean orphaned records, archive old sessions, refresh statistics, remove temp files and vacuum"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.settings.maintenance_interval)
            .on_startup(self.settings.run_on_startup)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError> {
        let report = self.run_maintenance(ctx).await?;

        let failures = report.failures();
        if failures > 0 {
            warn!("Database maintenance finished with {} failed sub-tasks", failures);
        } else {
            info!("Database maintenance finished");
        }

        serde_json::to_value(&report).map_err(|e| JobError::ExecutionFailed(e.to_string()))
    }
}
