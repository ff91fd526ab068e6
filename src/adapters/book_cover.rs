use super::{BookCoverInfo, BookCoverSource};
use crate::library_store::{Book, LibraryStore};
use std::path::PathBuf;
use std::sync::Arc;

pub struct BookCoverAdapter {
    book: Book,
}

impl BookCoverAdapter {
    pub fn new(book: Book) -> Self {
        Self { book }
    }
}

impl BookCoverInfo for BookCoverAdapter {
    fn id(&self) -> &str {
        &self.book.id
    }

    fn title(&self) -> &str {
        &self.book.title
    }

    fn cover_image_path(&self) -> Option<PathBuf> {
        self.book
            .cover_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

pub struct LibraryBookCoverSource {
    store: Arc<dyn LibraryStore>,
}

impl LibraryBookCoverSource {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }
}

impl BookCoverSource for LibraryBookCoverSource {
    fn list_books_needing_thumbnails(&self) -> anyhow::Result<Vec<Box<dyn BookCoverInfo>>> {
        Ok(self
            .store
            .list_books_with_covers()?
            .into_iter()
            .map(|book| Box::new(BookCoverAdapter::new(book)) as Box<dyn BookCoverInfo>)
            .collect())
    }
}
