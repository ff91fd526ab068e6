//! Watched-folder scanning.

use crate::adapters::{FolderImporter, ImportError};
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::config::LibraryScanSettings;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

/// Imports new book files from every watched folder. A folder that is missing
/// or unreadable is logged and skipped.
pub struct LibraryScanJob {
    importer: Arc<dyn FolderImporter>,
    settings: LibraryScanSettings,
}

impl LibraryScanJob {
    pub fn new(importer: Arc<dyn FolderImporter>, settings: LibraryScanSettings) -> Self {
        Self { importer, settings }
    }
}

#[async_trait]
impl BackgroundJob for LibraryScanJob {
    fn id(&self) -> &'static str {
        "library_scan"
    }

    fn name(&self) -> &'static str {
        "Library Scan"
    }

    fn description(&self) -> &'static str {
        "Import new book files from watched folders"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.settings.scan_interval).on_startup(self.settings.scan_on_startup)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError> {
        let mut imported = 0;
        let mut unavailable = Vec::new();
        let mut failed = Vec::new();

        for folder in &self.settings.watched_folders {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let importer = Arc::clone(&self.importer);
            let path = folder.clone();
            let token = ctx.cancellation_token.clone();
            let result = tokio::task::spawn_blocking(move || {
                importer.import_folder(&path, &|| token.is_cancelled())
            })
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("Import task failed: {}", e)))?;

            match result {
                Ok(count) => imported += count,
                Err(e @ ImportError::FolderUnavailable { .. }) => {
                    warn!("Skipping watched folder: {}", e);
                    unavailable.push(folder.display().to_string());
                }
                Err(e) => {
                    warn!("Failed to scan {:?}: {}", folder, e);
                    failed.push(folder.display().to_string());
                }
            }
        }

        if ctx.is_cancelled() {
            info!("Library scan cancelled after importing {} books", imported);
            return Err(JobError::Cancelled);
        }

        info!(
            "Library scan imported {} books from {} folders",
            imported,
            self.settings.watched_folders.len()
        );

        Ok(json!({
            "folders": self.settings.watched_folders.len(),
            "imported": imported,
            "unavailable": unavailable,
            "failed": failed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Importer stub: each known folder yields a fixed count, others are unavailable.
    struct StubImporter {
        folders: Vec<(PathBuf, usize)>,
        visited: Mutex<Vec<PathBuf>>,
    }

    impl FolderImporter for StubImporter {
        fn import_folder(
            &self,
            folder: &Path,
            should_stop: &dyn Fn() -> bool,
        ) -> Result<usize, ImportError> {
            self.visited.lock().unwrap().push(folder.to_path_buf());
            let count = self
                .folders
                .iter()
                .find(|(path, _)| path == folder)
                .map(|(_, count)| *count)
                .ok_or_else(|| ImportError::FolderUnavailable {
                    path: folder.to_path_buf(),
                    reason: "No such file or directory".to_string(),
                })?;
            Ok((0..count).take_while(|_| !should_stop()).count())
        }
    }

    /// Importer stub that requests shutdown after importing its first book.
    struct CancellingImporter {
        token: CancellationToken,
        imported: Mutex<usize>,
    }

    impl FolderImporter for CancellingImporter {
        fn import_folder(
            &self,
            _folder: &Path,
            should_stop: &dyn Fn() -> bool,
        ) -> Result<usize, ImportError> {
            let mut imported = 0;
            for _ in 0..10 {
                if should_stop() {
                    break;
                }
                imported += 1;
                self.token.cancel();
            }
            *self.imported.lock().unwrap() += imported;
            Ok(imported)
        }
    }

    fn settings(folders: &[&str]) -> LibraryScanSettings {
        LibraryScanSettings {
            watched_folders: folders.iter().map(PathBuf::from).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scans_every_folder_and_skips_unavailable() {
        let importer = Arc::new(StubImporter {
            folders: vec![(PathBuf::from("/a"), 2), (PathBuf::from("/c"), 3)],
            visited: Mutex::new(Vec::new()),
        });
        let job = LibraryScanJob::new(importer.clone(), settings(&["/a", "/gone", "/c"]));

        let report = job
            .execute(&JobContext::new(CancellationToken::new(), "manual"))
            .await
            .unwrap();

        assert_eq!(report["imported"], 5);
        assert_eq!(report["unavailable"], json!(["/gone"]));
        assert_eq!(importer.visited.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_folder() {
        let importer = Arc::new(StubImporter {
            folders: vec![(PathBuf::from("/a"), 1)],
            visited: Mutex::new(Vec::new()),
        });
        let job = LibraryScanJob::new(importer.clone(), settings(&["/a"]));
        let token = CancellationToken::new();
        token.cancel();

        let result = job.execute(&JobContext::new(token, "schedule")).await;

        assert_eq!(result, Err(JobError::Cancelled));
        assert!(importer.visited.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_import_inside_folder() {
        let token = CancellationToken::new();
        let importer = Arc::new(CancellingImporter {
            token: token.clone(),
            imported: Mutex::new(0),
        });
        let job = LibraryScanJob::new(importer.clone(), settings(&["/big", "/other"]));

        let result = job.execute(&JobContext::new(token, "schedule")).await;

        assert_eq!(result, Err(JobError::Cancelled));
        assert_eq!(*importer.imported.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_watched_folders() {
        let importer = Arc::new(StubImporter {
            folders: vec![],
            visited: Mutex::new(Vec::new()),
        });
        let job = LibraryScanJob::new(importer, settings(&[]));

        let report = job
            .execute(&JobContext::new(CancellationToken::new(), "manual"))
            .await
            .unwrap();
        assert_eq!(report["imported"], 0);
    }
}
