use super::{FolderImporter, ImportError};
use crate::library_store::{LibraryStore, NewBook};
use crate::metrics;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions recognised as books, lowercase.
pub const BOOK_EXTENSIONS: &[&str] = &["epub", "pdf", "mobi", "azw3", "fb2", "cbz"];

const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const FOLDER_COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct LibraryFolderImporter {
    store: Arc<dyn LibraryStore>,
}

impl LibraryFolderImporter {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }
}

impl FolderImporter for LibraryFolderImporter {
    fn import_folder(
        &self,
        folder: &Path,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<usize, ImportError> {
        let unavailable = |reason: String| ImportError::FolderUnavailable {
            path: folder.to_path_buf(),
            reason,
        };
        std::fs::read_dir(folder).map_err(|e| unavailable(e.to_string()))?;

        let mut imported = 0;
        for entry in WalkDir::new(folder).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", folder, e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_book_file(path) {
                continue;
            }
            if self.store.find_book_by_path(path)?.is_some() {
                continue;
            }
            if should_stop() {
                info!("Import of {:?} stopped after {} books", folder, imported);
                break;
            }

            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut book = NewBook::new(title, path);
            if let Some(cover) = find_cover(path) {
                book = book.with_cover(cover);
            }
            let book = self.store.insert_book(book)?;
            debug!("Imported {:?} as book {}", path, book.id);
            imported += 1;
        }

        if imported > 0 {
            info!("Imported {} new books from {:?}", imported, folder);
            metrics::record_books_imported(imported);
        }
        Ok(imported)
    }
}

fn is_book_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            BOOK_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// `<stem>.<image ext>` next to the book, else `cover.<image ext>` in the same folder.
fn find_cover(book_path: &Path) -> Option<PathBuf> {
    let dir = book_path.parent()?;
    let stem = book_path.file_stem()?;

    let existing = |name: &OsStr, ext: &str| {
        let mut file_name = name.to_os_string();
        file_name.push(".");
        file_name.push(ext);
        let candidate = dir.join(file_name);
        candidate.is_file().then_some(candidate)
    };

    COVER_EXTENSIONS
        .iter()
        .find_map(|ext| existing(stem, ext))
        .or_else(|| {
            FOLDER_COVER_EXTENSIONS
                .iter()
                .find_map(|ext| existing(OsStr::new("cover"), ext))
        })
}
