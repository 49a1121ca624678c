//! Database abstraction layer
//!
//! Repository traits split by concern: configuration reads, the
//! cross-node registry store, and fire-and-forget history writes. One
//! LibSQL implementation backs all three.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{ConfigRepository, HistoryRepository, LibsqlRepository, RegistryStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
