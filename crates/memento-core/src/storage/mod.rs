//! Storage engine
//!
//! SQLite-backed transactional store with:
//! - FTS5 full-text index with query sanitization
//! - Embedded vector storage (little-endian f64 blobs)
//! - Numbered up/down schema migrations
//! - Online-backup snapshot primitive

mod migrations;
mod sqlite;

pub use migrations::{Migration, MigrationManager};
pub use sqlite::{MemoryRef, SqliteStore, StoreStats};
