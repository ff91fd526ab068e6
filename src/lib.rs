//! Shelfkeeper Library
//!
//! Background maintenance and caching for an e-book library: cover thumbnails,
//! folder scanning, storage hygiene and log statistics. The modules are exposed
//! for testing and for embedding in the request-serving process.

pub mod adapters;
pub mod background_jobs;
pub mod cache;
pub mod config;
pub mod library_store;
pub mod metrics;
pub mod singleflight;
pub mod sqlite_persistence;
pub mod thumbnails;

// Re-export commonly used types for convenience
pub use background_jobs::{JobScheduler, SchedulerHandle};
pub use cache::{CacheService, MemoryCacheService};
pub use library_store::{LibraryStore, MaintenanceStore, SqliteLibraryStore};
