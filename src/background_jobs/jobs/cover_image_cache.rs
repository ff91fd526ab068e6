//! Cover thumbnail generation and eviction.
//!
//! Each run fills in thumbnails missing from the cache for every configured
//! size, then evicts cover thumbnails older than the configured max age.

use crate::adapters::{BookCoverInfo, BookCoverSource};
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::cache::{CacheService, CachedValue};
use crate::config::CoverImageSettings;
use crate::thumbnails::{ThumbnailError, ThumbnailGenerator, COVER_CACHE_PREFIX};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CoverImageCacheJob {
    source: Arc<dyn BookCoverSource>,
    generator: Arc<ThumbnailGenerator>,
    cache: Arc<dyn CacheService>,
    settings: CoverImageSettings,
}

impl CoverImageCacheJob {
    pub fn new(
        source: Arc<dyn BookCoverSource>,
        generator: Arc<ThumbnailGenerator>,
        cache: Arc<dyn CacheService>,
        settings: CoverImageSettings,
    ) -> Self {
        Self {
            source,
            generator,
            cache,
            settings,
        }
    }

    /// On-demand generation, sharing in-flight work with scheduled runs.
    pub async fn generate_thumbnail(
        &self,
        book_id: &str,
        source_path: &Path,
        width: u32,
        height: u32,
    ) -> Result<CachedValue, ThumbnailError> {
        self.generator
            .generate_thumbnail(book_id, source_path, width, height)
            .await
    }

    pub fn invalidate_cache(&self, book_id: &str) -> usize {
        self.generator.invalidate_cache(book_id)
    }

    /// Sizes of `book` that have no cached thumbnail yet.
    fn missing_sizes(&self, book: &dyn BookCoverInfo) -> Vec<(u32, u32)> {
        self.settings
            .thumbnail_sizes
            .iter()
            .filter(|size| !self.generator.is_cached(book.id(), size.width, size.height))
            .map(|size| (size.width, size.height))
            .collect()
    }

    /// Generate every missing size of every book. Returns (generated, failed).
    async fn generate_missing(
        &self,
        ctx: &JobContext,
        books: &[Box<dyn BookCoverInfo>],
    ) -> Result<(usize, usize), JobError> {
        let mut generated = 0;
        let mut failed = 0;
        let mut first = true;
        for book in books {
            let missing = self.missing_sizes(book.as_ref());
            if missing.is_empty() {
                continue;
            }
            let Some(cover_path) = book.cover_image_path() else {
                continue;
            };

            for (width, height) in missing {
                if ctx.is_cancelled() {
                    info!("Cover cache run cancelled after {} thumbnails", generated);
                    return Err(JobError::Cancelled);
                }
                if !first && !ctx.pause(self.settings.delay_between_generations).await {
                    return Err(JobError::Cancelled);
                }
                first = false;

                match self
                    .generator
                    .generate_thumbnail(book.id(), &cover_path, width, height)
                    .await
                {
                    Ok(_) => generated += 1,
                    Err(e) => {
                        warn!(
                            "Skipping thumbnail {}x{} for '{}' ({}): {}",
                            width,
                            height,
                            book.title(),
                            book.id(),
                            e
                        );
                        failed += 1;
                    }
                }
            }
        }
        Ok((generated, failed))
    }
}

#[async_trait]
impl BackgroundJob for CoverImageCacheJob {
    fn id(&self) -> &'static str {
        "cover_image_cache"
    }

    fn name(&self) -> &'static str {
        "Cover Image Cache"
    }

    fn description(&self) -> &'static str {
        "Generate missing cover thumbnails and evict stale ones"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.settings.cache_update_interval)
            .on_startup(self.settings.generate_on_startup)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JsonValue, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        // Eviction below runs whether or not listing succeeds.
        let (books, generated, failed, listing_error) =
            match self.source.list_books_needing_thumbnails() {
                Ok(books) => {
                    let (generated, failed) = self.generate_missing(ctx, &books).await?;
                    (books.len(), generated, failed, None)
                }
                Err(e) => {
                    warn!("Failed to list books needing thumbnails: {}", e);
                    (0, 0, 0, Some(e.to_string()))
                }
            };

        let evicted = if self.settings.enable_cache_cleanup {
            self.cache
                .remove_by_prefix_older_than(COVER_CACHE_PREFIX, self.settings.cache_max_age)
        } else {
            0
        };

        if generated > 0 || failed > 0 || evicted > 0 {
            info!(
                "Cover cache: {} generated, {} failed, {} evicted",
                generated, failed, evicted
            );
        } else {
            debug!("Cover cache already up to date");
        }

        if let Some(error) = listing_error {
            return Err(JobError::ExecutionFailed(format!(
                "Failed to list books ({} stale thumbnails evicted): {}",
                evicted, error
            )));
        }

        Ok(json!({
            "books": books,
            "generated": generated,
            "failed": failed,
            "evicted": evicted,
        }))
    }
}
