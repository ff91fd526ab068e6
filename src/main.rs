use anyhow::{Context, Result};
use clap::Parser;
use shelfkeeper::adapters::{LibraryBookCoverSource, LibraryFolderImporter};
use shelfkeeper::background_jobs::create_scheduler;
use shelfkeeper::background_jobs::jobs::{
    CoverImageCacheJob, DatabaseMaintenanceJob, LibraryScanJob, LoggingStatisticsJob,
};
use shelfkeeper::cache::{CacheService, MemoryCacheService};
use shelfkeeper::config::{AppConfig, CliConfig, FileConfig, LOG_FILE_PREFIX, LOG_FILE_SUFFIX};
use shelfkeeper::library_store::{LibraryStore, SqliteLibraryStore};
use shelfkeeper::metrics;
use shelfkeeper::thumbnails::{PassthroughResizer, ThumbnailGenerator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite library database file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for temporary files cleaned up by database maintenance.
    #[clap(long, value_parser = parse_path)]
    pub temp_dir: Option<PathBuf>,

    /// Directory to write log files to. Enables logging statistics.
    #[clap(long, value_parser = parse_path)]
    pub log_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Folder to scan for new books. Can be repeated.
    #[clap(long = "watch", value_parser = parse_path)]
    pub watched_folders: Vec<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            temp_dir: self.temp_dir.clone(),
            log_dir: self.log_dir.clone(),
            metrics_port: self.metrics_port,
            watched_folders: self.watched_folders.clone(),
        }
    }
}

/// Install the global subscriber. With a log directory, a second non-ANSI
/// layer writes daily-rotated files there; the returned guard flushes them
/// and must live until exit.
fn init_tracing(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix(LOG_FILE_SUFFIX)
                .build(log_dir)
                .context("Failed to create rolling log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let _log_guard = init_tracing(&config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening library database at {:?}...", config.db_path);
    let store = Arc::new(SqliteLibraryStore::new(&config.db_path)?);
    info!("Library has {} books", store.books_count()?);

    let cache: Arc<dyn CacheService> = Arc::new(MemoryCacheService::new());
    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone());

    if config.cover_image.enabled {
        let generator = Arc::new(ThumbnailGenerator::new(
            cache.clone(),
            Arc::new(PassthroughResizer),
        ));
        let job = CoverImageCacheJob::new(
            Arc::new(LibraryBookCoverSource::new(store.clone())),
            generator,
            cache.clone(),
            config.cover_image.clone(),
        );
        scheduler.register_job(Arc::new(job)).await;
    }

    if config.library_scan.enabled {
        if config.library_scan.watched_folders.is_empty() {
            warn!("Library scan enabled but no folders are watched");
        }
        let job = LibraryScanJob::new(
            Arc::new(LibraryFolderImporter::new(store.clone())),
            config.library_scan.clone(),
        );
        scheduler.register_job(Arc::new(job)).await;
    }

    if config.database_maintenance.enabled {
        let job = DatabaseMaintenanceJob::new(
            store.clone(),
            config.temp_dir.clone(),
            config.database_maintenance.clone(),
        );
        scheduler.register_job(Arc::new(job)).await;
    }

    if config.logging_statistics.enabled {
        match &config.log_dir {
            Some(log_dir) => {
                let job = LoggingStatisticsJob::new(
                    log_dir.clone(),
                    cache.clone(),
                    config.logging_statistics.clone(),
                )?;
                scheduler.register_job(Arc::new(job)).await;
            }
            None => warn!("Logging statistics enabled but no log directory is set, skipping"),
        }
    }

    if config.metrics_port != 0 {
        let port = config.metrics_port;
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(port, token).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let scheduler_task = tokio::spawn(async move {
        scheduler.run().await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown_token.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    for job in scheduler_handle.list_jobs().await {
        info!(
            "Job {}: {} runs, {} dropped ticks",
            job.id, job.run_count, job.skipped_ticks
        );
    }
    info!("Bye");
    Ok(())
}
