use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::candidate::CandidateEntry;
use super::record::PubmedRecord;

/// One row of matcher output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchScore {
    pub structure_id: String,
    pub pmid: String,
    pub score: f64,
}

impl MatchScore {
    pub fn new(structure_id: impl Into<String>, pmid: impl Into<String>, score: f64) -> Self {
        Self {
            structure_id: structure_id.into(),
            pmid: pmid.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedRecord {
    #[serde(flatten)]
    pub record: PubmedRecord,
    pub similarity_score: f64,
}

/// A candidate together with its best-first citation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub candidate: CandidateEntry,
    pub citations: Vec<RankedRecord>,
}

impl RankedEntry {
    /// Score of the best citation; 0.0 when the list is empty.
    pub fn top_score(&self) -> f64 {
        self.citations
            .first()
            .map(|c| c.similarity_score)
            .unwrap_or(0.0)
    }

    pub fn citation_ids(&self) -> Vec<&str> {
        self.citations.iter().map(|c| c.record.pmid.as_str()).collect()
    }
}

/// Annotator initials → ranked entries awaiting review.
pub type AnnotatorBuckets = BTreeMap<String, Vec<RankedEntry>>;
