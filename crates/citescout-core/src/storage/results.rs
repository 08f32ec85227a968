use std::sync::Arc;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::connection::ConnectionPool;
use crate::error::Result;
use crate::models::{AnnotatorBuckets, RankedEntry};

/// Durable home of the grouped result of the latest pipeline run.
pub struct ResultStore {
    pool: Arc<ConnectionPool>,
}

impl ResultStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Replaces every stored bucket with `buckets` in one transaction.
    pub fn save(&self, run_id: Uuid, buckets: &AnnotatorBuckets) -> Result<()> {
        let mut conn = self.pool.get_connection();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM citation_buckets", [])?;

        let created_at = Utc::now().to_rfc3339();
        for (bucket, entries) in buckets {
            tx.execute(
                "INSERT INTO citation_buckets (bucket, run_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    bucket,
                    run_id.to_string(),
                    serde_json::to_string(entries)?,
                    created_at
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(%run_id, buckets = buckets.len(), "stored citation buckets");
        Ok(())
    }

    /// Entries of one bucket, or `None` if no such bucket was stored.
    pub fn load(&self, bucket: &str) -> Result<Option<Vec<RankedEntry>>> {
        let conn = self.pool.get_connection();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM citation_buckets WHERE bucket = ?1",
                params![bucket],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn load_all(&self) -> Result<AnnotatorBuckets> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare("SELECT bucket, payload FROM citation_buckets")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut buckets = AnnotatorBuckets::new();
        for row in rows {
            let (bucket, payload) = row?;
            buckets.insert(bucket, serde_json::from_str(&payload)?);
        }
        Ok(buckets)
    }

    pub fn bucket_names(&self) -> Result<Vec<String>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare("SELECT bucket FROM citation_buckets ORDER BY bucket")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    pub fn last_run_id(&self) -> Result<Option<Uuid>> {
        let conn = self.pool.get_connection();
        let run_id: Option<String> = conn
            .query_row("SELECT run_id FROM citation_buckets LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(run_id.and_then(|s| Uuid::parse_str(&s).ok()))
    }
}
