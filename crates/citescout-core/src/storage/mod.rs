pub mod candidates;
pub mod connection;
pub mod migrations;
pub mod results;
pub mod schema;

use std::path::Path;

use crate::error::Result;
use connection::ConnectionPool;

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        let applied = migrations::run_migrations(&conn)?;
        if !applied.is_empty() {
            tracing::info!(path = %path.display(), ?applied, "database migrated");
        }
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

/// Schema version of the database behind `pool`.
pub fn schema_version(pool: &ConnectionPool) -> Result<u32> {
    let conn = pool.get_connection();
    migrations::schema_version(&conn)
}
