use std::path::Path;

use anyhow::{Context, Result};
use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Builder, Connection, Database, Error as LibsqlError};

pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // Concurrent loops write from separate connections; wait instead of failing fast
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (or create) a local database file, build a pool over it and bring the
/// schema up to date.
pub async fn open_local(path: impl AsRef<Path>, max_connections: usize) -> Result<LibsqlPool> {
    let path = path.as_ref();
    let database = Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;

    let pool: LibsqlPool = Pool::builder(LibsqlManager::new(database))
        .max_size(max_connections.max(1))
        .build()
        .context("Failed to build connection pool")?;

    let conn = pool.get().await?;
    crate::database::initialize_database(&conn).await?;

    Ok(pool)
}
