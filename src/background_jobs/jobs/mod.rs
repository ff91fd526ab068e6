//! Background job implementations.

pub mod cover_image_cache;
pub mod database_maintenance;
pub mod library_scan;
pub mod logging_statistics;

pub use cover_image_cache::CoverImageCacheJob;
pub use database_maintenance::{
    cleanup_temp_files, DatabaseMaintenanceJob, MaintenanceReport, SubtaskOutcome,
};
pub use library_scan::LibraryScanJob;
pub use logging_statistics::{
    compile_log_pattern, LogStatistics, LogStatsError, LoggingStatisticsJob, LOG_STATS_CACHE_KEY,
};
