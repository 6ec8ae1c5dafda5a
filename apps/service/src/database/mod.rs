/// Entity store
///
/// Streams, nodes, the append-only probe log and the economics ledger,
/// backed by a pooled local LibSQL database.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::{Database, DatabaseImpl};

    /// Migrated database in a temp dir; keep the guard alive for the test's duration
    pub async fn create_test_database() -> (Arc<dyn Database>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = crate::pool::open_local(temp_dir.path().join("test.db"), 4).await.unwrap();
        (Arc::new(DatabaseImpl::new_from_pool(pool)), temp_dir)
    }
}
