//! Narrow views over the library that background jobs depend on.
//!
//! Jobs only see these traits; the concrete implementations translate from
//! [`crate::library_store`] types.

mod book_cover;
mod folder_import;

pub use book_cover::{BookCoverAdapter, LibraryBookCoverSource};
pub use folder_import::{LibraryFolderImporter, BOOK_EXTENSIONS};

use std::path::{Path, PathBuf};

/// Read-only projection of a book, as needed for cover thumbnails.
pub trait BookCoverInfo: Send + Sync {
    fn id(&self) -> &str;
    fn title(&self) -> &str;
    /// Current cover image on disk, `None` when the book has no cover.
    fn cover_image_path(&self) -> Option<PathBuf>;
}

pub trait BookCoverSource: Send + Sync {
    /// Books that may need thumbnails. Which sizes are actually missing is
    /// decided by the caller from the cache.
    fn list_books_needing_thumbnails(&self) -> anyhow::Result<Vec<Box<dyn BookCoverInfo>>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Folder {path:?} is unavailable: {reason}")]
    FolderUnavailable { path: PathBuf, reason: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub trait FolderImporter: Send + Sync {
    /// Imports book files under `folder` that are not in the library yet.
    /// Returns the number of newly imported books.
    ///
    /// `should_stop` is checked before each book; once it returns true the
    /// import ends early with the count so far.
    fn import_folder(&self, folder: &Path, should_stop: &dyn Fn() -> bool)
        -> Result<usize, ImportError>;
}
