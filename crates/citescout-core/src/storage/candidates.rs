use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use super::connection::ConnectionPool;
use crate::error::{CoreError, Result};
use crate::models::CandidateEntry;

/// Upstream store of entries awaiting citation discovery.
pub trait CandidateSource: Send + Sync {
    /// Current candidate list, in stable store order.
    fn candidates(&self) -> Result<Vec<CandidateEntry>>;

    /// Initials of annotators currently on the active roster.
    fn active_annotators(&self) -> Result<Vec<String>>;
}

pub struct SqliteCandidateStore {
    pool: Arc<ConnectionPool>,
}

impl SqliteCandidateStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Inserts or replaces candidates, keeping the original position of
    /// entries that already exist. Returns the number written.
    pub fn import_candidates(&self, entries: &[CandidateEntry]) -> Result<usize> {
        let mut conn = self.pool.get_connection();
        let tx = conn.transaction()?;

        let mut next_position: i64 =
            tx.query_row("SELECT COALESCE(MAX(position) + 1, 0) FROM candidates", [], |row| {
                row.get(0)
            })?;

        for entry in entries {
            if entry.structure_id.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "candidate titled {:?} has no structure id",
                    entry.title
                )));
            }
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT position FROM candidates WHERE structure_id = ?1",
                    params![entry.structure_id],
                    |row| row.get(0),
                )
                .optional()?;
            let position = match existing {
                Some(p) => p,
                None => {
                    next_position += 1;
                    next_position - 1
                }
            };

            tx.execute(
                "INSERT OR REPLACE INTO candidates
                    (structure_id, position, title, authors, pubmed_id, doi, annotator, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.structure_id,
                    position,
                    entry.title,
                    serde_json::to_string(&entry.authors)?,
                    entry.pubmed_id,
                    entry.doi,
                    entry.annotator,
                    entry.status,
                ],
            )?;

            tx.execute(
                "DELETE FROM candidate_author_terms WHERE structure_id = ?1",
                params![entry.structure_id],
            )?;
            for (ordinal, term) in entry.author_terms.iter().enumerate() {
                tx.execute(
                    "INSERT INTO candidate_author_terms (structure_id, ordinal, term)
                     VALUES (?1, ?2, ?3)",
                    params![entry.structure_id, ordinal as i64, term],
                )?;
            }
        }

        tx.commit()?;
        Ok(entries.len())
    }

    /// Replaces the annotator roster.
    pub fn set_annotators(&self, initials: &[&str]) -> Result<()> {
        let mut conn = self.pool.get_connection();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM annotators", [])?;
        for i in initials {
            tx.execute(
                "INSERT OR REPLACE INTO annotators (initials, active) VALUES (?1, 1)",
                params![i.trim().to_uppercase()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl CandidateSource for SqliteCandidateStore {
    fn candidates(&self) -> Result<Vec<CandidateEntry>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT structure_id, title, authors, pubmed_id, doi, annotator, status
             FROM candidates ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (structure_id, title, authors, pubmed_id, doi, annotator, status) = row?;
            entries.push(CandidateEntry {
                structure_id,
                title,
                authors: serde_json::from_str(&authors)?,
                author_terms: Vec::new(),
                pubmed_id,
                doi,
                annotator,
                status,
            });
        }

        let mut term_stmt = conn.prepare(
            "SELECT term FROM candidate_author_terms WHERE structure_id = ?1 ORDER BY ordinal",
        )?;
        for entry in &mut entries {
            let terms = term_stmt.query_map(params![entry.structure_id], |row| row.get(0))?;
            for term in terms {
                entry.author_terms.push(term?);
            }
        }

        Ok(entries)
    }

    fn active_annotators(&self) -> Result<Vec<String>> {
        let conn = self.pool.get_connection();
        let mut stmt =
            conn.prepare("SELECT initials FROM annotators WHERE active = 1 ORDER BY initials")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut initials = Vec::new();
        for row in rows {
            initials.push(row?);
        }
        Ok(initials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_in_memory;

    fn store() -> SqliteCandidateStore {
        SqliteCandidateStore::new(Arc::new(open_in_memory().unwrap()))
    }

    fn entry(id: &str) -> CandidateEntry {
        let mut e = CandidateEntry::new(id, format!("Structure {id}"));
        e.authors = vec!["Smith, J.".to_string()];
        e.author_terms = vec!["Smith+J[au]".to_string(), "Lee+K[au]".to_string()];
        e
    }

    #[test]
    fn import_and_read_back_in_order() {
        let store = store();
        store.import_candidates(&[entry("B2"), entry("A1")]).unwrap();

        let loaded = store.candidates().unwrap();
        let ids: Vec<_> = loaded.iter().map(|c| c.structure_id.as_str()).collect();
        assert_eq!(ids, vec!["B2", "A1"]);
        assert_eq!(loaded[0].author_terms, vec!["Smith+J[au]", "Lee+K[au]"]);
        assert_eq!(loaded[0].authors, vec!["Smith, J."]);
    }

    #[test]
    fn reimport_keeps_position_and_replaces_terms() {
        let store = store();
        store.import_candidates(&[entry("A1"), entry("B2")]).unwrap();

        let mut updated = entry("A1");
        updated.author_terms = vec!["Doe+J[au]".to_string()];
        updated.doi = Some("10.1/x".to_string());
        store.import_candidates(&[updated]).unwrap();

        let loaded = store.candidates().unwrap();
        assert_eq!(loaded[0].structure_id, "A1");
        assert_eq!(loaded[0].author_terms, vec!["Doe+J[au]"]);
        assert_eq!(loaded[0].doi.as_deref(), Some("10.1/x"));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn roster_is_uppercased_and_replaced() {
        let store = store();
        store.set_annotators(&["ab", "CD"]).unwrap();
        assert_eq!(store.active_annotators().unwrap(), vec!["AB", "CD"]);

        store.set_annotators(&["XY"]).unwrap();
        assert_eq!(store.active_annotators().unwrap(), vec!["XY"]);
    }

    #[test]
    fn blank_structure_id_is_rejected() {
        let store = store();
        let err = store.import_candidates(&[entry("  ")]).unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(store.candidates().unwrap().is_empty());
    }
}
