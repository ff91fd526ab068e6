use super::models::{Book, NewBook};
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use super::{LibraryStore, MaintenanceError, MaintenanceStore};
use crate::sqlite_persistence::{VersionedSchema, BASE_DB_VERSION};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const VACUUM_LOCK_POLL: Duration = Duration::from_millis(10);

pub struct SqliteLibraryStore {
    conn: Mutex<Connection>,
}

impl SqliteLibraryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open library database")?;

        if is_new_db {
            info!("Creating new library database at {:?}", path);
            latest_schema()?.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version < 1 {
                anyhow::bail!(
                    "Library database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = LIBRARY_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown library database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Library database schema validation failed for version {}",
                    db_version
                )
            })?;

            let current_version = latest_schema()?.version;
            if (db_version as usize) < current_version {
                info!(
                    "Migrating library database from version {} to {}",
                    db_version, current_version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest = from_version;
        for schema in LIBRARY_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            debug!("Running library migration to version {}", schema.version);
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            latest = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_book(row: &rusqlite::Row) -> rusqlite::Result<Book> {
        let file_path: String = row.get("file_path")?;
        let cover_path: Option<String> = row.get("cover_path")?;
        let added_at: i64 = row.get("added_at")?;
        Ok(Book {
            id: row.get("id")?,
            title: row.get("title")?,
            author: row.get("author")?,
            file_path: PathBuf::from(file_path),
            cover_path: cover_path.filter(|p| !p.is_empty()).map(PathBuf::from),
            added_at: DateTime::from_timestamp(added_at, 0).unwrap_or_default(),
        })
    }
}

fn latest_schema() -> Result<&'static VersionedSchema> {
    LIBRARY_VERSIONED_SCHEMAS
        .last()
        .context("No library schema defined")
}

fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

const BOOK_COLUMNS: &str = "id, title, author, file_path, cover_path, added_at";

impl LibraryStore for SqliteLibraryStore {
    fn insert_book(&self, book: NewBook) -> Result<Book> {
        let stored = Book {
            id: uuid::Uuid::new_v4().to_string(),
            title: book.title,
            author: book.author,
            file_path: book.file_path,
            cover_path: book.cover_path,
            added_at: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_default(),
        };
        self.lock()
            .execute(
                "INSERT INTO books (id, title, author, file_path, cover_path, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stored.id,
                    stored.title,
                    stored.author,
                    path_to_sql(&stored.file_path),
                    stored.cover_path.as_deref().map(path_to_sql),
                    stored.added_at.timestamp(),
                ],
            )
            .with_context(|| format!("Failed to insert book {:?}", stored.file_path))?;
        Ok(stored)
    }

    fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.lock();
        let book = conn
            .query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![id],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn find_book_by_path(&self, path: &Path) -> Result<Option<Book>> {
        let conn = self.lock();
        let book = conn
            .query_row(
                &format!("SELECT {} FROM books WHERE file_path = ?1", BOOK_COLUMNS),
                params![path_to_sql(path)],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn delete_book(&self, id: &str) -> Result<bool> {
        let deleted = self
            .lock()
            .execute("DELETE FROM books WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn list_books_with_covers(&self) -> Result<Vec<Book>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM books WHERE cover_path IS NOT NULL AND cover_path != '' ORDER BY added_at, id",
            BOOK_COLUMNS
        ))?;
        let books = stmt
            .query_map([], Self::row_to_book)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(books)
    }

    fn books_count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn add_reading_position(&self, book_id: &str, location: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO reading_positions (book_id, location) VALUES (?1, ?2)",
            params![book_id, location],
        )?;
        Ok(())
    }

    fn add_bookmark(&self, book_id: &str, location: &str, note: Option<&str>) -> Result<()> {
        self.lock().execute(
            "INSERT INTO bookmarks (book_id, location, note) VALUES (?1, ?2, ?3)",
            params![book_id, location, note],
        )?;
        Ok(())
    }

    fn add_reading_session(
        &self,
        book_id: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        self.lock().execute(
            "INSERT INTO reading_sessions (book_id, started_at, duration_secs) VALUES (?1, ?2, ?3)",
            params![book_id, started_at.timestamp(), duration.as_secs() as i64],
        )?;
        Ok(())
    }
}

const CHILD_TABLES: &[&str] = &[
    "reading_positions",
    "bookmarks",
    "reading_sessions",
    "reading_session_archive",
];

impl MaintenanceStore for SqliteLibraryStore {
    fn delete_orphaned_records(&self) -> Result<usize, MaintenanceError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for table in CHILD_TABLES {
            let count = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE book_id NOT IN (SELECT id FROM books)",
                    table
                ),
                [],
            )?;
            if count > 0 {
                debug!("Deleted {} orphaned rows from {}", count, table);
            }
            deleted += count;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn compress_records_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, MaintenanceError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO reading_session_archive (book_id, period, session_count, total_duration_secs)
             SELECT book_id, strftime('%Y-%m', started_at, 'unixepoch'), COUNT(*), SUM(duration_secs)
             FROM reading_sessions
             WHERE started_at < ?1
             GROUP BY 1, 2
             ON CONFLICT(book_id, period) DO UPDATE SET
                session_count = session_count + excluded.session_count,
                total_duration_secs = total_duration_secs + excluded.total_duration_secs",
            params![cutoff.timestamp()],
        )?;
        let archived = tx.execute(
            "DELETE FROM reading_sessions WHERE started_at < ?1",
            params![cutoff.timestamp()],
        )?;
        tx.commit()?;
        Ok(archived)
    }

    fn update_statistics(&self) -> Result<(), MaintenanceError> {
        self.lock().execute_batch("ANALYZE;")?;
        Ok(())
    }

    fn vacuum(&self, timeout: Duration) -> Result<(), MaintenanceError> {
        let deadline = Instant::now() + timeout;
        let conn = loop {
            match self.conn.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(MaintenanceError::ExclusiveAccessUnavailable {
                            waited: timeout,
                        });
                    }
                    std::thread::sleep(VACUUM_LOCK_POLL);
                }
            }
        };
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_store() -> (SqliteLibraryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteLibraryStore::new(temp_dir.path().join("library.db")).unwrap();
        (store, temp_dir)
    }

    fn count_rows(store: &SqliteLibraryStore, table: &str) -> i64 {
        store
            .lock()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn test_insert_and_get_book() {
        let (store, _dir) = create_store();

        let book = store
            .insert_book(NewBook::new("Dune", "/books/dune.epub").with_cover("/books/dune.jpg"))
            .unwrap();

        let loaded = store.get_book(&book.id).unwrap().unwrap();
        assert_eq!(loaded, book);
        assert_eq!(loaded.cover_path, Some(PathBuf::from("/books/dune.jpg")));
        assert!(store.get_book("missing").unwrap().is_none());
    }

    #[test]
    fn test_find_book_by_path() {
        let (store, _dir) = create_store();
        let book = store
            .insert_book(NewBook::new("Emma", "/books/emma.epub"))
            .unwrap();

        let found = store
            .find_book_by_path(Path::new("/books/emma.epub"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, book.id);
        assert!(store
            .find_book_by_path(Path::new("/books/other.epub"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_file_path_is_rejected() {
        let (store, _dir) = create_store();
        store
            .insert_book(NewBook::new("A", "/books/a.epub"))
            .unwrap();
        assert!(store
            .insert_book(NewBook::new("A again", "/books/a.epub"))
            .is_err());
        assert_eq!(store.books_count().unwrap(), 1);
    }

    #[test]
    fn test_list_books_with_covers_skips_coverless() {
        let (store, _dir) = create_store();
        store
            .insert_book(NewBook::new("With", "/books/with.epub").with_cover("/books/with.png"))
            .unwrap();
        store
            .insert_book(NewBook::new("Without", "/books/without.epub"))
            .unwrap();

        let books = store.list_books_with_covers().unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "With");
    }

    #[test]
    fn test_delete_book_leaves_orphans_for_maintenance() {
        let (store, _dir) = create_store();
        let kept = store.insert_book(NewBook::new("Kept", "/k.epub")).unwrap();
        let gone = store.insert_book(NewBook::new("Gone", "/g.epub")).unwrap();

        store.add_reading_position(&kept.id, "ch1").unwrap();
        store.add_reading_position(&gone.id, "ch2").unwrap();
        store.add_bookmark(&gone.id, "ch2", Some("nice")).unwrap();
        store
            .add_reading_session(&gone.id, Utc::now(), Duration::from_secs(60))
            .unwrap();

        assert!(store.delete_book(&gone.id).unwrap());
        assert!(!store.delete_book(&gone.id).unwrap());
        assert_eq!(count_rows(&store, "reading_positions"), 2);

        assert_eq!(store.delete_orphaned_records().unwrap(), 3);
        assert_eq!(count_rows(&store, "reading_positions"), 1);
        assert_eq!(count_rows(&store, "bookmarks"), 0);
        assert_eq!(count_rows(&store, "reading_sessions"), 0);

        assert_eq!(store.delete_orphaned_records().unwrap(), 0);
    }

    #[test]
    fn test_compress_records_rolls_up_by_month() {
        let (store, _dir) = create_store();
        let book = store.insert_book(NewBook::new("Long", "/l.epub")).unwrap();
        let jan = Utc.with_ymd_and_hms(2020, 1, 5, 10, 0, 0).unwrap();
        let jan_late = Utc.with_ymd_and_hms(2020, 1, 28, 22, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2020, 2, 1, 8, 0, 0).unwrap();
        let recent = Utc::now();

        store
            .add_reading_session(&book.id, jan, Duration::from_secs(600))
            .unwrap();
        store
            .add_reading_session(&book.id, jan_late, Duration::from_secs(300))
            .unwrap();
        store
            .add_reading_session(&book.id, feb, Duration::from_secs(120))
            .unwrap();
        store
            .add_reading_session(&book.id, recent, Duration::from_secs(30))
            .unwrap();

        let cutoff = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.compress_records_older_than(cutoff).unwrap(), 3);
        assert_eq!(count_rows(&store, "reading_sessions"), 1);

        let (count, total): (i64, i64) = store
            .lock()
            .query_row(
                "SELECT session_count, total_duration_secs FROM reading_session_archive
                 WHERE book_id = ?1 AND period = '2020-01'",
                params![book.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((count, total), (2, 900));
        assert_eq!(count_rows(&store, "reading_session_archive"), 2);

        // A later pass over the same month merges into the existing row
        store
            .add_reading_session(&book.id, jan, Duration::from_secs(100))
            .unwrap();
        assert_eq!(store.compress_records_older_than(cutoff).unwrap(), 1);
        let (count, total): (i64, i64) = store
            .lock()
            .query_row(
                "SELECT session_count, total_duration_secs FROM reading_session_archive
                 WHERE book_id = ?1 AND period = '2020-01'",
                params![book.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((count, total), (3, 1000));
    }

    #[test]
    fn test_update_statistics_and_vacuum() {
        let (store, _dir) = create_store();
        store.insert_book(NewBook::new("A", "/a.epub")).unwrap();

        store.update_statistics().unwrap();
        store.vacuum(Duration::from_secs(1)).unwrap();
        assert_eq!(store.books_count().unwrap(), 1);
    }

    #[test]
    fn test_vacuum_gives_up_when_connection_is_busy() {
        let (store, _dir) = create_store();
        let _guard = store.lock();

        let started = Instant::now();
        let result = store.vacuum(Duration::from_millis(50));

        assert!(matches!(
            result,
            Err(MaintenanceError::ExclusiveAccessUnavailable { .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("library.db");
        {
            let store = SqliteLibraryStore::new(&db_path).unwrap();
            store.insert_book(NewBook::new("A", "/a.epub")).unwrap();
        }

        let store = SqliteLibraryStore::new(&db_path).unwrap();
        assert_eq!(store.books_count().unwrap(), 1);
    }

    #[test]
    fn test_migrates_v1_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("library.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            LIBRARY_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        }

        let store = SqliteLibraryStore::new(&db_path).unwrap();
        let version: i64 = store
            .lock()
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 2);
        LIBRARY_VERSIONED_SCHEMAS[1].validate(&store.lock()).unwrap();

        let book = store.insert_book(NewBook::new("A", "/a.epub")).unwrap();
        store.add_bookmark(&book.id, "p1", None).unwrap();
    }

    #[test]
    fn test_rejects_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        }

        assert!(SqliteLibraryStore::new(&db_path).is_err());
    }
}
