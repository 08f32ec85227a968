use serde::{Deserialize, Serialize};

use crate::error::{Result, ScienceError};

const DOI_PREFIXES: [&str; 6] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
    "DOI:",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doi {
    pub raw: String,
    pub normalized: String,
}

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let stripped = DOI_PREFIXES
            .iter()
            .find_map(|prefix| input.strip_prefix(prefix))
            .map(str::trim_start)
            .unwrap_or(input);

        // 10.<registrant>/<suffix>, both parts non-empty
        let Some((registrant, suffix)) = stripped.split_once('/') else {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        };
        if !registrant.starts_with("10.") || registrant.len() == 3 || suffix.is_empty() {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }

        Ok(Self {
            raw: input.to_string(),
            normalized: stripped.to_lowercase(),
        })
    }

    /// Normalized form when `input` parses, otherwise the trimmed input.
    pub fn normalize_lossy(input: &str) -> String {
        Self::parse(input)
            .map(|doi| doi.normalized)
            .unwrap_or_else(|_| input.trim().to_string())
    }
}
