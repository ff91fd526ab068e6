mod versioned_schema;

pub use versioned_schema::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

/// Offset added to schema versions stored in `PRAGMA user_version`, so that a
/// foreign SQLite file is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 52000;
