use super::{
    cover_cache_book_prefix, cover_cache_key, ImageResizer, ResizeError, ThumbnailError,
};
use crate::cache::{CacheService, CachedValue};
use crate::metrics;
use crate::singleflight::SingleFlight;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Renders cover thumbnails into the shared cache.
///
/// Concurrent requests for the same `(book, width, height)` collapse into one
/// read + resize; late callers await the result of the first.
pub struct ThumbnailGenerator {
    cache: Arc<dyn CacheService>,
    resizer: Arc<dyn ImageResizer>,
    flights: SingleFlight<String, CachedValue, ThumbnailError>,
}

impl ThumbnailGenerator {
    pub fn new(cache: Arc<dyn CacheService>, resizer: Arc<dyn ImageResizer>) -> Self {
        Self {
            cache,
            resizer,
            flights: SingleFlight::new(),
        }
    }

    /// Render the cover at `source_path` to `width`x`height` and cache it
    /// under `cover:{book_id}:{width}x{height}`.
    ///
    /// The size in the key is the requested one. Whether the bytes are
    /// actually scaled is up to the [`ImageResizer`]: the default
    /// [`PassthroughResizer`](super::PassthroughResizer) stores the original
    /// cover unscaled under every size.
    ///
    /// On failure the previously cached thumbnail, if any, is left in place.
    pub async fn generate_thumbnail(
        &self,
        book_id: &str,
        source_path: &Path,
        width: u32,
        height: u32,
    ) -> Result<CachedValue, ThumbnailError> {
        let key = cover_cache_key(book_id, width, height);
        let cache = Arc::clone(&self.cache);
        let resizer = Arc::clone(&self.resizer);
        let source_path = source_path.to_path_buf();
        let cache_key = key.clone();

        self.flights
            .run(key, move || async move {
                let result = render(resizer, &source_path, width, height).await;
                match &result {
                    Ok(value) => {
                        cache.set(&cache_key, value.clone());
                        metrics::record_thumbnail_generation("generated");
                        debug!("Cached thumbnail {}", cache_key);
                    }
                    Err(ThumbnailError::ImageSourceUnavailable { .. }) => {
                        metrics::record_thumbnail_generation("unavailable");
                    }
                    Err(e) => {
                        metrics::record_thumbnail_generation("failed");
                        warn!("Thumbnail generation for {} failed: {}", cache_key, e);
                    }
                }
                result
            })
            .await
    }

    /// Drop every cached thumbnail of `book_id`, whatever its size.
    pub fn invalidate_cache(&self, book_id: &str) -> usize {
        let removed = self
            .cache
            .remove_by_prefix(&cover_cache_book_prefix(book_id));
        debug!("Invalidated {} thumbnails for book {}", removed, book_id);
        removed
    }

    /// Whether a thumbnail for this size is currently cached.
    pub fn is_cached(&self, book_id: &str, width: u32, height: u32) -> bool {
        self.cache
            .contains_key(&cover_cache_key(book_id, width, height))
    }

    pub fn is_generating(&self, book_id: &str, width: u32, height: u32) -> bool {
        self.flights
            .is_in_flight(&cover_cache_key(book_id, width, height))
    }
}

async fn render(
    resizer: Arc<dyn ImageResizer>,
    source_path: &Path,
    width: u32,
    height: u32,
) -> Result<CachedValue, ThumbnailError> {
    let unavailable = |reason: String| ThumbnailError::ImageSourceUnavailable {
        path: source_path.to_path_buf(),
        reason,
    };

    if source_path.as_os_str().is_empty() {
        return Err(unavailable("empty cover path".to_string()));
    }

    let bytes = tokio::fs::read(source_path)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let resized = tokio::task::spawn_blocking(move || resizer.resize(&bytes, width, height))
        .await
        .map_err(|e| ThumbnailError::TaskFailed(e.to_string()))?;

    match resized {
        Ok(data) => Ok(Arc::from(data)),
        Err(ResizeError::NotAnImage) => Err(unavailable(ResizeError::NotAnImage.to_string())),
        Err(ResizeError::Failed(msg)) => Err(ThumbnailError::ResizeFailed(msg)),
    }
}
