//! Log aggregation.
//!
//! Parses the log files in the log directory with the configured pattern,
//! stores a summary in the cache under [`LOG_STATS_CACHE_KEY`], and deletes
//! log files that fell out of the retention window.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::cache::CacheService;
use crate::config::LoggingStatisticsSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub const LOG_STATS_CACHE_KEY: &str = "logstats:summary";

#[derive(Debug, thiserror::Error)]
pub enum LogStatsError {
    #[error("Invalid log entry pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Log entry pattern has no named 'message' group")]
    MissingMessageGroup,

    #[error("Log directory {path:?} is unavailable: {source}")]
    LogDirUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Compile a log entry pattern. It must have a `message` group; `timestamp`,
/// `level` and `target` groups are used when present.
pub fn compile_log_pattern(pattern: &str) -> Result<Regex, LogStatsError> {
    let regex = Regex::new(pattern)?;
    if !regex.capture_names().flatten().any(|name| name == "message") {
        return Err(LogStatsError::MissingMessageGroup);
    }
    Ok(regex)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub message: String,
    pub count: usize,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub files_scanned: usize,
    pub total_entries: usize,
    pub unparsed_lines: usize,
    pub entries_by_level: BTreeMap<String, usize>,
    pub top_errors: Vec<ErrorSummary>,
    /// Entry count per log target.
    pub usage_by_target: BTreeMap<String, usize>,
}

/// Accumulates parsed log lines into [`LogStatistics`].
pub struct LogAggregator<'a> {
    pattern: &'a Regex,
    window_start: DateTime<Utc>,
    total_entries: usize,
    unparsed_lines: usize,
    entries_by_level: BTreeMap<String, usize>,
    errors: HashMap<String, (usize, Option<DateTime<Utc>>)>,
    usage_by_target: BTreeMap<String, usize>,
}

impl<'a> LogAggregator<'a> {
    pub fn new(pattern: &'a Regex, window_start: DateTime<Utc>) -> Self {
        Self {
            pattern,
            window_start,
            total_entries: 0,
            unparsed_lines: 0,
            entries_by_level: BTreeMap::new(),
            errors: HashMap::new(),
            usage_by_target: BTreeMap::new(),
        }
    }

    pub fn add_text(&mut self, text: &str) {
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            self.add_line(line);
        }
    }

    pub fn add_line(&mut self, line: &str) {
        let Some(caps) = self.pattern.captures(line) else {
            self.unparsed_lines += 1;
            return;
        };
        let Some(message) = caps.name("message") else {
            self.unparsed_lines += 1;
            return;
        };

        let timestamp = caps
            .name("timestamp")
            .and_then(|ts| DateTime::parse_from_rfc3339(ts.as_str()).ok())
            .map(|ts| ts.with_timezone(&Utc));
        if timestamp.is_some_and(|ts| ts < self.window_start) {
            return;
        }

        self.total_entries += 1;
        let level = caps
            .name("level")
            .map(|l| l.as_str().to_ascii_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        if let Some(target) = caps.name("target") {
            *self
                .usage_by_target
                .entry(target.as_str().to_string())
                .or_insert(0) += 1;
        }
        if level == "ERROR" {
            let entry = self
                .errors
                .entry(message.as_str().trim().to_string())
                .or_insert((0, None));
            entry.0 += 1;
            entry.1 = entry.1.max(timestamp);
        }
        *self.entries_by_level.entry(level).or_insert(0) += 1;
    }

    pub fn finish(self, files_scanned: usize, top_n: usize) -> LogStatistics {
        let mut top_errors: Vec<ErrorSummary> = self
            .errors
            .into_iter()
            .map(|(message, (count, last_seen))| ErrorSummary {
                message,
                count,
                last_seen,
            })
            .collect();
        top_errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.message.cmp(&b.message))
        });
        top_errors.truncate(top_n);

        LogStatistics {
            generated_at: Utc::now(),
            window_start: self.window_start,
            files_scanned,
            total_entries: self.total_entries,
            unparsed_lines: self.unparsed_lines,
            entries_by_level: self.entries_by_level,
            top_errors,
            usage_by_target: self.usage_by_target,
        }
    }
}

pub struct LoggingStatisticsJob {
    log_dir: PathBuf,
    cache: Arc<dyn CacheService>,
    pattern: Regex,
    settings: LoggingStatisticsSettings,
}

impl LoggingStatisticsJob {
    pub fn new(
        log_dir: PathBuf,
        cache: Arc<dyn CacheService>,
        settings: LoggingStatisticsSettings,
    ) -> Result<Self, LogStatsError> {
        let pattern = compile_log_pattern(&settings.log_entry_pattern)?;
        Ok(Self {
            log_dir,
            cache,
            pattern,
            settings,
        })
    }

    fn log_files(&self) -> Result<Vec<PathBuf>, LogStatsError> {
        let unavailable = |source| LogStatsError::LogDirUnavailable {
            path: self.log_dir.clone(),
            source,
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.log_dir)
            .map_err(unavailable)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "log"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Delete log files last written before the retention window.
    ///
    /// Files rotate daily, so a file whose last write is older than the
    /// window holds only expired entries. The most recently written file is
    /// the one the appender has open and is always kept.
    async fn delete_expired(&self, files: &[PathBuf]) -> usize {
        let mut written = Vec::with_capacity(files.len());
        for path in files {
            match tokio::fs::metadata(path).await.and_then(|meta| meta.modified()) {
                Ok(modified) => written.push((path, modified)),
                Err(e) => warn!("Failed to stat log file {:?}: {}", path, e),
            }
        }
        let newest = written
            .iter()
            .max_by_key(|(_, modified)| *modified)
            .map(|(path, _)| *path);

        let now = SystemTime::now();
        let mut deleted = 0;
        for (path, modified) in &written {
            if Some(*path) == newest {
                continue;
            }
            let expired = now
                .duration_since(*modified)
                .is_ok_and(|age| age > self.settings.log_retention);
            if !expired {
                continue;
            }
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!("Deleted expired log file {:?}", path);
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete log file {:?}: {}", path, e),
            }
        }
        deleted
    }
}

#[async_trait]
impl BackgroundJob for LoggingStatisticsJob {
    fn id(&self) -> &'static str {
        "logging_statistics"
    }

    fn name(&self) -> &'static str {
        "Logging Statistics"
    }

    fn description(&self) -> &'static str {
        "Aggregate log files into error and usage summaries"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.settings.aggregation_interval)
            .on_startup(self.settings.run_on_startup)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError> {
        let files = self
            .log_files()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        // A retention reaching past the representable range keeps everything.
        let window_start = chrono::Duration::from_std(self.settings.log_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut aggregator = LogAggregator::new(&self.pattern, window_start);

        let mut files_scanned = 0;
        for path in &files {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    aggregator.add_text(&String::from_utf8_lossy(&bytes));
                    files_scanned += 1;
                }
                Err(e) => warn!("Failed to read log file {:?}: {}", path, e),
            }
        }

        let stats = aggregator.finish(files_scanned, self.settings.top_errors_count);
        let encoded =
            serde_json::to_vec(&stats).map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        self.cache.set(LOG_STATS_CACHE_KEY, Arc::from(encoded));

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let deleted_files = self.delete_expired(&files).await;

        info!(
            "Aggregated {} log entries from {} files ({} errors tracked, {} files expired)",
            stats.total_entries,
            files_scanned,
            stats.top_errors.len(),
            deleted_files
        );

        Ok(json!({
            "files_scanned": files_scanned,
            "total_entries": stats.total_entries,
            "unparsed_lines": stats.unparsed_lines,
            "deleted_files": deleted_files,
        }))
    }
}
