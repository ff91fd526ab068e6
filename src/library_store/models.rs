use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A book known to the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub file_path: PathBuf,
    /// Cover image on disk, if one was found at import time.
    pub cover_path: Option<PathBuf>,
    pub added_at: DateTime<Utc>,
}

/// Fields needed to insert a book; id and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub title: String,
    pub author: Option<String>,
    pub file_path: PathBuf,
    pub cover_path: Option<PathBuf>,
}

impl NewBook {
    pub fn new(title: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            author: None,
            file_path: file_path.into(),
            cover_path: None,
        }
    }

    pub fn with_cover(mut self, cover_path: impl Into<PathBuf>) -> Self {
        self.cover_path = Some(cover_path.into());
        self
    }
}
