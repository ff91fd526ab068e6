use crate::thumbnails::ThumbnailSize;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub temp_dir: Option<String>,
    pub log_dir: Option<String>,
    pub metrics_port: Option<u16>,

    // Per-job settings
    pub cover_image: Option<CoverImageConfig>,
    pub library_scan: Option<LibraryScanConfig>,
    pub database_maintenance: Option<DatabaseMaintenanceConfig>,
    pub logging_statistics: Option<LoggingStatisticsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CoverImageConfig {
    pub enabled: Option<bool>,
    pub cache_update_interval_secs: Option<u64>,
    pub generate_on_startup: Option<bool>,
    pub enable_cache_cleanup: Option<bool>,
    pub cache_max_age_days: Option<u64>,
    pub delay_between_generations_ms: Option<u64>,
    pub thumbnail_sizes: Option<Vec<ThumbnailSize>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LibraryScanConfig {
    pub enabled: Option<bool>,
    pub scan_interval_secs: Option<u64>,
    pub scan_on_startup: Option<bool>,
    pub watched_folders: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DatabaseMaintenanceConfig {
    pub enabled: Option<bool>,
    pub maintenance_interval_secs: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub enable_vacuum: Option<bool>,
    pub enable_orphaned_record_cleanup: Option<bool>,
    pub enable_data_compression: Option<bool>,
    pub data_compression_age_days: Option<u64>,
    pub enable_statistics_update: Option<bool>,
    pub enable_temp_file_cleanup: Option<bool>,
    pub temp_file_age_days: Option<u64>,
    pub vacuum_lock_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LoggingStatisticsConfig {
    pub enabled: Option<bool>,
    pub aggregation_interval_secs: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub log_retention_days: Option<u64>,
    pub top_errors_count: Option<usize>,
    pub log_entry_pattern: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
