//! Cover thumbnail rendering and caching.

mod generator;
mod resizer;

pub use generator::ThumbnailGenerator;
pub use resizer::{ImageResizer, PassthroughResizer, ResizeError};

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Cache key prefix for all cover thumbnails.
pub const COVER_CACHE_PREFIX: &str = "cover:";

/// A configured thumbnail size, e.g. `small` at 100x150.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl ThumbnailSize {
    pub fn new(width: u32, height: u32, label: impl Into<String>) -> Self {
        Self {
            width,
            height,
            label: label.into(),
        }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.label, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThumbnailError {
    #[error("Image source unavailable at {path:?}: {reason}")]
    ImageSourceUnavailable { path: PathBuf, reason: String },

    #[error("Failed to resize image: {0}")]
    ResizeFailed(String),

    #[error("Thumbnail task failed: {0}")]
    TaskFailed(String),
}

/// Cache key for one book's thumbnail at one size: `cover:{book_id}:{w}x{h}`.
pub fn cover_cache_key(book_id: &str, width: u32, height: u32) -> String {
    format!("{}{}:{}x{}", COVER_CACHE_PREFIX, book_id, width, height)
}

/// Prefix shared by every thumbnail of one book.
///
/// Ends with the separator so that invalidating `b1` leaves `b10` alone.
pub fn cover_cache_book_prefix(book_id: &str) -> String {
    format!("{}{}:", COVER_CACHE_PREFIX, book_id)
}
