//! Files shared with the external matcher.
//!
//! The exchange file is one JSON object with three named tables:
//! `candidates`, `term_matches` and `records`. The matcher answers with a
//! JSON object whose `matches` table holds `(structure_id, pmid, score)`
//! rows.

use std::collections::HashMap;
use std::path::Path;

use citescout_core::{CandidateEntry, MatchScore, PubmedRecord, SearchTerm, TermMatchMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregator::doi_search_term;
use crate::error::{Result, ScienceError};

/// Stand-in for a record without a DOI.
pub const UNKNOWN_DOI: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRow {
    pub structure_id: String,
    pub title: String,
    pub authors: String,
    pub author_terms: String,
    pub pubmed_id: Option<String>,
    /// DOI as stored on the candidate.
    pub doi: Option<String>,
    /// The `<doi>[aid]` term actually searched. The DOI in it is normalized
    /// (prefix stripped, lower-cased) and equals the matching `TermRow::term`.
    pub doi_term: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermRow {
    pub term: String,
    pub pmids: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordRow {
    pub pmid: String,
    pub doi: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExchangeData {
    pub candidates: Vec<CandidateRow>,
    pub term_matches: Vec<TermRow>,
    pub records: Vec<RecordRow>,
}

impl ExchangeData {
    /// Term rows follow `terms`; record rows are ordered by id.
    pub fn build(
        candidates: &[CandidateEntry],
        terms: &[SearchTerm],
        matches: &TermMatchMap,
        records: &HashMap<String, PubmedRecord>,
    ) -> Self {
        let candidates = candidates
            .iter()
            .map(|c| CandidateRow {
                structure_id: c.structure_id.clone(),
                title: c.title.clone(),
                authors: c.authors.join("; "),
                author_terms: c.author_terms.join(","),
                pubmed_id: c.pubmed_id.clone(),
                doi: c.doi.clone(),
                doi_term: doi_search_term(c).map(|t| t.to_string()),
            })
            .collect();

        let term_matches = terms
            .iter()
            .filter_map(|t| {
                matches.get(t).map(|ids| TermRow {
                    term: t.to_string(),
                    pmids: ids.join(","),
                })
            })
            .collect();

        let mut records: Vec<RecordRow> = records
            .values()
            .map(|r| RecordRow {
                pmid: r.pmid.clone(),
                doi: r.doi.clone().unwrap_or_else(|| UNKNOWN_DOI.to_string()),
                title: r.title.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.pmid.cmp(&b.pmid));

        Self {
            candidates,
            term_matches,
            records,
        }
    }
}

pub struct ExchangeWriter;

impl ExchangeWriter {
    pub fn write(path: &Path, data: &ExchangeData) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(path, json)?;
        info!(
            path = %path.display(),
            candidates = data.candidates.len(),
            terms = data.term_matches.len(),
            records = data.records.len(),
            "wrote matcher exchange file"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    structure_id: String,
    #[serde(alias = "record_id")]
    pmid: String,
    score: f64,
}

pub struct MatchResultReader;

impl MatchResultReader {
    /// Rows of the `matches` table in file order. A missing file or a
    /// missing table means no matches.
    pub fn read(path: &Path) -> Result<Vec<MatchScore>> {
        if !path.exists() {
            debug!(path = %path.display(), "no matcher output");
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Vec<MatchScore>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut doc: Value = serde_json::from_str(text)
            .map_err(|e| ScienceError::Parse(format!("matcher output: {e}")))?;
        let Some(table) = doc.get_mut("matches").map(Value::take) else {
            return Ok(Vec::new());
        };
        if table.is_null() {
            return Ok(Vec::new());
        }
        let rows: Vec<MatchRow> = serde_json::from_value(table)
            .map_err(|e| ScienceError::Parse(format!("matcher output rows: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|r| MatchScore::new(r.structure_id, r.pmid, r.score))
            .collect())
    }
}
