use std::collections::HashSet;

use citescout_core::{CandidateEntry, CandidateSource, SearchTerm, TermKind};
use tracing::info;

use crate::error::Result;
use crate::identifiers::doi::Doi;

/// Candidates for one run plus the deduplicated search terms they yield.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<CandidateEntry>,
    pub terms: Vec<SearchTerm>,
}

pub struct CandidateAggregator<'a> {
    source: &'a dyn CandidateSource,
}

impl<'a> CandidateAggregator<'a> {
    pub fn new(source: &'a dyn CandidateSource) -> Self {
        Self { source }
    }

    pub fn load(&self) -> Result<CandidateSet> {
        let candidates = self.source.candidates()?;
        let terms = collect_search_terms(&candidates);
        let doi_terms = terms.iter().filter(|t| t.kind() == TermKind::ArticleId).count();
        info!(
            candidates = candidates.len(),
            terms = terms.len(),
            doi_terms,
            "loaded citation candidates"
        );
        Ok(CandidateSet { candidates, terms })
    }
}

/// `<DOI>[aid]` for the entry's DOI, normalized when it parses.
pub fn doi_search_term(entry: &CandidateEntry) -> Option<SearchTerm> {
    let raw = entry.doi.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(SearchTerm::article_id(&Doi::normalize_lossy(raw)))
}

/// Per candidate: its DOI term, then its author keys verbatim. The first
/// occurrence of a term wins and traversal order is kept.
pub fn collect_search_terms(candidates: &[CandidateEntry]) -> Vec<SearchTerm> {
    let mut seen: HashSet<SearchTerm> = HashSet::new();
    let mut terms = Vec::new();

    for entry in candidates {
        let author_terms = entry
            .author_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(SearchTerm::from);

        for term in doi_search_term(entry).into_iter().chain(author_terms) {
            if seen.insert(term.clone()) {
                terms.push(term);
            }
        }
    }

    terms
}
