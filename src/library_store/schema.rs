//! SQLite schema definitions for the library database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

// =============================================================================
// Version 1 - Books, reading positions, reading sessions
// =============================================================================

const BOOKS_TABLE_V1: Table = Table {
    name: "books",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("author", &SqlType::Text),
        sqlite_column!("file_path", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("cover_path", &SqlType::Text),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    primary_key: None,
};

// No foreign keys: rows left behind by deleted books are swept by maintenance.
const READING_POSITIONS_TABLE_V1: Table = Table {
    name: "reading_positions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("book_id", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_reading_positions_book", "book_id")],
    primary_key: None,
};

const READING_SESSIONS_TABLE_V1: Table = Table {
    name: "reading_sessions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("book_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!("duration_secs", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_reading_sessions_book", "book_id"),
        ("idx_reading_sessions_started", "started_at"),
    ],
    primary_key: None,
};

// =============================================================================
// Version 2 - Bookmarks and archived reading sessions
// =============================================================================

const BOOKMARKS_TABLE_V2: Table = Table {
    name: "bookmarks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("book_id", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("note", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_bookmarks_book", "book_id")],
    primary_key: None,
};

/// Monthly per-book rollup of reading sessions that aged out.
const READING_SESSION_ARCHIVE_TABLE_V2: Table = Table {
    name: "reading_session_archive",
    columns: &[
        sqlite_column!("book_id", &SqlType::Text, non_null = true),
        sqlite_column!("period", &SqlType::Text, non_null = true),
        sqlite_column!("session_count", &SqlType::Integer, non_null = true),
        sqlite_column!("total_duration_secs", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    primary_key: Some(&["book_id", "period"]),
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    BOOKMARKS_TABLE_V2.create(conn)?;
    READING_SESSION_ARCHIVE_TABLE_V2.create(conn)?;
    Ok(())
}

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            BOOKS_TABLE_V1,
            READING_POSITIONS_TABLE_V1,
            READING_SESSIONS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            BOOKS_TABLE_V1,
            READING_POSITIONS_TABLE_V1,
            READING_SESSIONS_TABLE_V1,
            BOOKMARKS_TABLE_V2,
            READING_SESSION_ARCHIVE_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
