use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::candidate::SearchTerm;

/// Search term → record ids found for it. Terms without hits are absent.
pub type TermMatchMap = HashMap<SearchTerm, Vec<String>>;

/// A bibliographic record fetched from PubMed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PubmedRecord {
    pub pmid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

impl PubmedRecord {
    pub fn new(pmid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            pmid: pmid.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Short journal reference, e.g. `J Mol Biol 12:100-110 (2004)`.
    pub fn citation_line(&self) -> String {
        let mut line = self.journal.clone().unwrap_or_default();
        if let Some(volume) = &self.volume {
            line.push(' ');
            line.push_str(volume);
        }
        if let Some(pages) = &self.pages {
            line.push(':');
            line.push_str(pages);
        }
        if let Some(year) = self.year {
            line.push_str(&format!(" ({year})"));
        }
        line.trim().to_string()
    }
}
