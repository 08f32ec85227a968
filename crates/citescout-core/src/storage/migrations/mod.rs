mod v1_initial;

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::{CoreError, Result};

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(v1_initial::V1Initial)]
}

/// Versions recorded in `schema_migrations`; empty on a fresh database.
fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let tracked = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'")?
        .exists([])?;
    if !tracked {
        return Ok(BTreeSet::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut versions = BTreeSet::new();
    for row in rows {
        versions.insert(row?);
    }
    Ok(versions)
}

/// Applies every pending migration in version order and returns the
/// versions applied by this call.
pub fn run_migrations(conn: &Connection) -> Result<Vec<u32>> {
    let done = applied_versions(conn)?;
    let mut pending = all_migrations();
    pending.retain(|m| !done.contains(&m.version()));
    pending.sort_by_key(|m| m.version());

    let mut applied = Vec::with_capacity(pending.len());
    for migration in pending {
        let version = migration.version();
        tracing::debug!(version, description = migration.description(), "applying migration");
        migration.up(conn).map_err(|e| CoreError::Migration {
            version,
            message: e.to_string(),
        })?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        applied.push(version);
    }
    Ok(applied)
}

/// Highest applied migration, or 0 for an unmigrated database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(applied_versions(conn)?.last().copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::SCHEMA_VERSION;

    #[test]
    fn fresh_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), vec![SCHEMA_VERSION]);
        assert!(run_migrations(&conn).unwrap().is_empty());
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
