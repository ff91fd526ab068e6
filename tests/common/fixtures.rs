use shelfkeeper::cache::MemoryCacheService;
use shelfkeeper::config::CoverImageSettings;
use shelfkeeper::library_store::{Book, LibraryStore, NewBook, SqliteLibraryStore};
use shelfkeeper::thumbnails::{ImageResizer, ResizeError, ThumbnailSize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Smallest byte string `infer` recognises as a PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRcover";

/// A library database, cache and book folder living in a temp directory.
pub struct TestLibrary {
    _dir: TempDir,
    pub root: PathBuf,
    pub books_dir: PathBuf,
    pub store: Arc<SqliteLibraryStore>,
    pub cache: Arc<MemoryCacheService>,
}

impl TestLibrary {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let books_dir = root.join("books");
        std::fs::create_dir_all(&books_dir).unwrap();
        let store = Arc::new(SqliteLibraryStore::new(root.join("library.db")).unwrap());

        Self {
            _dir: dir,
            root,
            books_dir,
            store,
            cache: Arc::new(MemoryCacheService::new()),
        }
    }

    /// Writes a book file with a sibling PNG cover, without importing it.
    pub fn write_book_file(&self, file_name: &str) -> PathBuf {
        let path = self.books_dir.join(file_name);
        std::fs::write(&path, b"book contents").unwrap();
        let stem = Path::new(file_name).file_stem().unwrap().to_string_lossy();
        std::fs::write(self.books_dir.join(format!("{}.png", stem)), PNG_BYTES).unwrap();
        path
    }

    /// Inserts a book directly into the store, with a PNG cover on disk.
    pub fn add_book_with_cover(&self, title: &str) -> Book {
        let file_path = self.write_book_file(&format!("{}.epub", title));
        let cover = file_path.with_extension("png");
        self.store
            .insert_book(NewBook::new(title, file_path).with_cover(cover))
            .unwrap()
    }
}

/// Resizer that counts calls and sleeps to make runs observably long.
pub struct CountingResizer {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingResizer {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageResizer for CountingResizer {
    fn resize(&self, source: &[u8], _width: u32, _height: u32) -> Result<Vec<u8>, ResizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(source.to_vec())
    }
}

/// Cover settings with a single size and no pacing between generations.
pub fn cover_settings(interval: Duration) -> CoverImageSettings {
    CoverImageSettings {
        cache_update_interval: interval,
        generate_on_startup: true,
        delay_between_generations: Duration::ZERO,
        thumbnail_sizes: vec![ThumbnailSize::new(100, 150, "small")],
        ..Default::default()
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
