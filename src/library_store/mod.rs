mod models;
mod schema;
mod sqlite_library_store;

pub use models::{Book, NewBook};
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use sqlite_library_store::SqliteLibraryStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// Book catalogue and reading data.
pub trait LibraryStore: Send + Sync {
    fn insert_book(&self, book: NewBook) -> Result<Book>;
    fn get_book(&self, id: &str) -> Result<Option<Book>>;
    fn find_book_by_path(&self, path: &Path) -> Result<Option<Book>>;
    /// Deletes the book row only; its reading data becomes orphaned.
    fn delete_book(&self, id: &str) -> Result<bool>;
    fn list_books_with_covers(&self) -> Result<Vec<Book>>;
    fn books_count(&self) -> Result<usize>;

    fn add_reading_position(&self, book_id: &str, location: &str) -> Result<()>;
    fn add_bookmark(&self, book_id: &str, location: &str, note: Option<&str>) -> Result<()>;
    fn add_reading_session(
        &self,
        book_id: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Could not get exclusive database access within {waited:?}")]
    ExclusiveAccessUnavailable { waited: Duration },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Storage hygiene operations run by the maintenance job.
pub trait MaintenanceStore: Send + Sync {
    /// Removes reading data whose book no longer exists. Returns rows deleted.
    fn delete_orphaned_records(&self) -> Result<usize, MaintenanceError>;

    /// Rolls reading sessions started before `cutoff` into monthly archive
    /// rows and deletes them. Returns the number of sessions archived.
    fn compress_records_older_than(&self, cutoff: DateTime<Utc>)
        -> Result<usize, MaintenanceError>;

    fn update_statistics(&self) -> Result<(), MaintenanceError>;

    /// Rebuilds the database file. Needs the connection exclusively; gives up
    /// with `ExclusiveAccessUnavailable` after `timeout`.
    fn vacuum(&self, timeout: Duration) -> Result<(), MaintenanceError>;
}
