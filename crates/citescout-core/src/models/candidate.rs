use std::fmt;

use serde::{Deserialize, Serialize};

/// A database entry that still lacks a finalized citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CandidateEntry {
    pub structure_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Prepared author search keys such as `Smith+J[au]`.
    #[serde(default)]
    pub author_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubmed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Initials of the annotator responsible for the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl CandidateEntry {
    pub fn new(structure_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            structure_id: structure_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Fills `author_terms` from `authors` when no keys were supplied.
    pub fn derive_author_terms(&mut self) {
        if !self.author_terms.is_empty() {
            return;
        }
        let mut terms: Vec<String> = Vec::new();
        for key in self.authors.iter().filter_map(|a| author_search_key(a)) {
            if !terms.contains(&key) {
                terms.push(key);
            }
        }
        self.author_terms = terms;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    ArticleId,
    Author,
    Other,
}

/// Query key sent to the bibliographic index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SearchTerm(String);

impl SearchTerm {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// `<DOI>[aid]`
    pub fn article_id(doi: &str) -> Self {
        Self(format!("{doi}[aid]"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> TermKind {
        if self.0.ends_with("[aid]") {
            TermKind::ArticleId
        } else if self.0.ends_with("[au]") {
            TermKind::Author
        } else {
            TermKind::Other
        }
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SearchTerm {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Builds `Surname+Initial[au]` from a name written as `Surname, Given`
/// or `Given Surname`.
pub fn author_search_key(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let (surname, given) = match name.split_once(',') {
        Some((surname, given)) => (surname.trim(), given.trim()),
        None => {
            let mut parts: Vec<&str> = name.split_whitespace().collect();
            let surname = parts.pop()?;
            (surname, parts.first().copied().unwrap_or(""))
        }
    };

    let surname: String = surname
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("+");
    if surname.is_empty() {
        return None;
    }

    match given.chars().find(|c| c.is_alphabetic()) {
        Some(initial) => Some(format!("{surname}+{}[au]", initial.to_uppercase())),
        None => Some(format!("{surname}[au]")),
    }
}
