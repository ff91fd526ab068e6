mod file_config;

pub use file_config::{
    CoverImageConfig, DatabaseMaintenanceConfig, FileConfig, LibraryScanConfig,
    LoggingStatisticsConfig,
};

use crate::background_jobs::jobs::compile_log_pattern;
use crate::thumbnails::ThumbnailSize;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Log files under `log_dir` rotate daily as `shelfkeeper.YYYY-MM-DD.log`.
pub const LOG_FILE_PREFIX: &str = "shelfkeeper";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Matches lines written by the non-ANSI `tracing_subscriber::fmt` layer, e.g.
/// `2024-05-01T10:00:00.123456Z ERROR shelfkeeper::thumbnails: Failed to resize`.
pub const DEFAULT_LOG_ENTRY_PATTERN: &str = r"^(?P<timestamp>\S+)\s+(?P<level>TRACE|DEBUG|INFO|WARN|ERROR)\s+(?:(?P<target>[\w:]+):\s+)?(?P<message>.*)$";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub watched_folders: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub metrics_port: u16,

    pub cover_image: CoverImageSettings,
    pub library_scan: LibraryScanSettings,
    pub database_maintenance: DatabaseMaintenanceSettings,
    pub logging_statistics: LoggingStatisticsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present; defaults fill the rest.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .or_else(|| cli.temp_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("shelfkeeper"));
        let log_dir = file.log_dir.map(PathBuf::from).or_else(|| cli.log_dir.clone());
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let cover_file = file.cover_image.unwrap_or_default();
        let cover_defaults = CoverImageSettings::default();
        let cover_image = CoverImageSettings {
            enabled: cover_file.enabled.unwrap_or(cover_defaults.enabled),
            cache_update_interval: cover_file
                .cache_update_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(cover_defaults.cache_update_interval),
            generate_on_startup: cover_file
                .generate_on_startup
                .unwrap_or(cover_defaults.generate_on_startup),
            enable_cache_cleanup: cover_file
                .enable_cache_cleanup
                .unwrap_or(cover_defaults.enable_cache_cleanup),
            cache_max_age: cover_file
                .cache_max_age_days
                .map(days)
                .unwrap_or(cover_defaults.cache_max_age),
            delay_between_generations: cover_file
                .delay_between_generations_ms
                .map(Duration::from_millis)
                .unwrap_or(cover_defaults.delay_between_generations),
            thumbnail_sizes: cover_file
                .thumbnail_sizes
                .unwrap_or(cover_defaults.thumbnail_sizes),
        };

        let scan_file = file.library_scan.unwrap_or_default();
        let scan_defaults = LibraryScanSettings::default();
        let library_scan = LibraryScanSettings {
            enabled: scan_file.enabled.unwrap_or(scan_defaults.enabled),
            scan_interval: scan_file
                .scan_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(scan_defaults.scan_interval),
            scan_on_startup: scan_file
                .scan_on_startup
                .unwrap_or(scan_defaults.scan_on_startup),
            watched_folders: scan_file
                .watched_folders
                .map(|folders| folders.into_iter().map(PathBuf::from).collect())
                .unwrap_or_else(|| cli.watched_folders.clone()),
        };

        let dm_file = file.database_maintenance.unwrap_or_default();
        let dm_defaults = DatabaseMaintenanceSettings::default();
        let database_maintenance = DatabaseMaintenanceSettings {
            enabled: dm_file.enabled.unwrap_or(dm_defaults.enabled),
            maintenance_interval: dm_file
                .maintenance_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(dm_defaults.maintenance_interval),
            run_on_startup: dm_file.run_on_startup.unwrap_or(dm_defaults.run_on_startup),
            enable_vacuum: dm_file.enable_vacuum.unwrap_or(dm_defaults.enable_vacuum),
            enable_orphaned_record_cleanup: dm_file
                .enable_orphaned_record_cleanup
                .unwrap_or(dm_defaults.enable_orphaned_record_cleanup),
            enable_data_compression: dm_file
                .enable_data_compression
                .unwrap_or(dm_defaults.enable_data_compression),
            data_compression_age: dm_file
                .data_compression_age_days
                .map(days)
                .unwrap_or(dm_defaults.data_compression_age),
            enable_statistics_update: dm_file
                .enable_statistics_update
                .unwrap_or(dm_defaults.enable_statistics_update),
            enable_temp_file_cleanup: dm_file
                .enable_temp_file_cleanup
                .unwrap_or(dm_defaults.enable_temp_file_cleanup),
            temp_file_age: dm_file
                .temp_file_age_days
                .map(days)
                .unwrap_or(dm_defaults.temp_file_age),
            vacuum_lock_timeout: dm_file
                .vacuum_lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(dm_defaults.vacuum_lock_timeout),
        };

        let ls_file = file.logging_statistics.unwrap_or_default();
        let ls_defaults = LoggingStatisticsSettings::default();
        let logging_statistics = LoggingStatisticsSettings {
            enabled: ls_file.enabled.unwrap_or(ls_defaults.enabled),
            aggregation_interval: ls_file
                .aggregation_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(ls_defaults.aggregation_interval),
            run_on_startup: ls_file.run_on_startup.unwrap_or(ls_defaults.run_on_startup),
            log_retention: ls_file
                .log_retention_days
                .map(days)
                .unwrap_or(ls_defaults.log_retention),
            top_errors_count: ls_file
                .top_errors_count
                .unwrap_or(ls_defaults.top_errors_count),
            log_entry_pattern: ls_file
                .log_entry_pattern
                .unwrap_or(ls_defaults.log_entry_pattern),
        };

        let config = Self {
            db_path,
            temp_dir,
            log_dir,
            metrics_port,
            cover_image,
            library_scan,
            database_maintenance,
            logging_statistics,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("cover_image.cache_update_interval", self.cover_image.cache_update_interval),
            ("library_scan.scan_interval", self.library_scan.scan_interval),
            (
                "database_maintenance.maintenance_interval",
                self.database_maintenance.maintenance_interval,
            ),
            (
                "logging_statistics.aggregation_interval",
                self.logging_statistics.aggregation_interval,
            ),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }

        for size in &self.cover_image.thumbnail_sizes {
            if size.width == 0 || size.height == 0 {
                bail!("Thumbnail size {} must have a positive width and height", size);
            }
        }

        self.logging_statistics.compiled_pattern()?;
        Ok(())
    }
}

fn days(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(DAY))
}

#[derive(Debug, Clone)]
pub struct CoverImageSettings {
    pub enabled: bool,
    pub cache_update_interval: Duration,
    pub generate_on_startup: bool,
    pub enable_cache_cleanup: bool,
    pub cache_max_age: Duration,
    pub delay_between_generations: Duration,
    pub thumbnail_sizes: Vec<ThumbnailSize>,
}

impl Default for CoverImageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_update_interval: Duration::from_secs(HOUR),
            generate_on_startup: true,
            enable_cache_cleanup: true,
            cache_max_age: days(30),
            delay_between_generations: Duration::from_millis(100),
            thumbnail_sizes: vec![
                ThumbnailSize::new(100, 150, "small"),
                ThumbnailSize::new(200, 300, "large"),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LibraryScanSettings {
    pub enabled: bool,
    pub scan_interval: Duration,
    pub scan_on_startup: bool,
    pub watched_folders: Vec<PathBuf>,
}

impl Default for LibraryScanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: Duration::from_secs(30 * 60),
            scan_on_startup: true,
            watched_folders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseMaintenanceSettings {
    pub enabled: bool,
    pub maintenance_interval: Duration,
    pub run_on_startup: bool,
    pub enable_vacuum: bool,
    pub enable_orphaned_record_cleanup: bool,
    pub enable_data_compression: bool,
    pub data_compression_age: Duration,
    pub enable_statistics_update: bool,
    pub enable_temp_file_cleanup: bool,
    pub temp_file_age: Duration,
    pub vacuum_lock_timeout: Duration,
}

impl Default for DatabaseMaintenanceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            maintenance_interval: Duration::from_secs(DAY),
            run_on_startup: false,
            enable_vacuum: true,
            enable_orphaned_record_cleanup: true,
            enable_data_compression: false,
            data_compression_age: days(365),
            enable_statistics_update: true,
            enable_temp_file_cleanup: true,
            temp_file_age: days(7),
            vacuum_lock_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingStatisticsSettings {
    pub enabled: bool,
    pub aggregation_interval: Duration,
    pub run_on_startup: bool,
    pub log_retention: Duration,
    pub top_errors_count: usize,
    pub log_entry_pattern: String,
}

impl LoggingStatisticsSettings {
    /// Compile `log_entry_pattern`, requiring a `message` capture group.
    pub fn compiled_pattern(&self) -> Result<Regex> {
        compile_log_pattern(&self.log_entry_pattern)
            .with_context(|| format!("Bad log_entry_pattern: {}", self.log_entry_pattern))
    }
}

impl Default for LoggingStatisticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            aggregation_interval: Duration::from_secs(HOUR),
            run_on_startup: false,
            log_retention: days(30),
            top_errors_count: 10,
            log_entry_pattern: DEFAULT_LOG_ENTRY_PATTERN.to_string(),
        }
    }
}
