use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS candidates (
            structure_id TEXT PRIMARY KEY,
            position     INTEGER NOT NULL,
            title        TEXT NOT NULL DEFAULT '',
            authors      TEXT NOT NULL DEFAULT '[]',
            pubmed_id    TEXT,
            doi          TEXT,
            annotator    TEXT,
            status       TEXT
        );

        CREATE TABLE IF NOT EXISTS candidate_author_terms (
            structure_id TEXT NOT NULL REFERENCES candidates(structure_id) ON DELETE CASCADE,
            ordinal      INTEGER NOT NULL,
            term         TEXT NOT NULL,
            PRIMARY KEY (structure_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS annotators (
            initials TEXT PRIMARY KEY,
            active   INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS citation_buckets (
            bucket     TEXT PRIMARY KEY,
            run_id     TEXT NOT NULL,
            payload    TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_candidates_position ON candidates(position);
        CREATE INDEX IF NOT EXISTS idx_buckets_run ON citation_buckets(run_id);
        ",
    )?;
    Ok(())
}
