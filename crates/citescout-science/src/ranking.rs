//! Joins matcher scores to fetched records, ranks each candidate's
//! citations and groups candidates into annotator buckets.
//!
//! Every descending order here is produced by a stable ascending sort
//! followed by a reversal, so entries with equal scores come out in the
//! reverse of their insertion order. Review order depends on this.

use std::collections::{HashMap, HashSet};

use citescout_core::config::RankingConfig;
use citescout_core::{
    AnnotatorBuckets, CandidateEntry, MatchScore, PubmedRecord, RankedEntry, RankedRecord,
};
use tracing::{debug, info};

/// Structure id → `(pmid, score)` in matcher row order.
pub type ScoreGroups = HashMap<String, Vec<(String, f64)>>;

pub fn group_scores(scores: &[MatchScore]) -> ScoreGroups {
    let mut groups = ScoreGroups::new();
    for s in scores {
        groups
            .entry(s.structure_id.clone())
            .or_default()
            .push((s.pmid.clone(), s.score));
    }
    groups
}

/// Stable ascending sort on `key`, then reverse.
fn sort_desc_ties_reversed<T>(items: &mut [T], key: impl Fn(&T) -> f64) {
    if items.len() > 1 {
        items.sort_by(|a, b| key(a).total_cmp(&key(b)));
        items.reverse();
    }
}

pub struct RankingEngine {
    excluded: HashSet<String>,
    fallback_bucket: String,
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl RankingEngine {
    pub fn from_config(cfg: &RankingConfig) -> Self {
        Self {
            excluded: cfg
                .excluded_annotators
                .iter()
                .map(|a| a.trim().to_uppercase())
                .collect(),
            fallback_bucket: cfg.fallback_bucket.trim().to_uppercase(),
        }
    }

    /// Ranked citation lists for every candidate that has at least one
    /// score whose record was fetched. Candidate order is preserved.
    pub fn rank(
        &self,
        candidates: Vec<CandidateEntry>,
        scores: &[MatchScore],
        records: &HashMap<String, PubmedRecord>,
    ) -> Vec<RankedEntry> {
        let mut groups = group_scores(scores);
        for list in groups.values_mut() {
            sort_desc_ties_reversed(list, |(_, score)| *score);
        }

        let mut ranked = Vec::new();
        for candidate in candidates {
            let Some(list) = groups.get(&candidate.structure_id) else {
                continue;
            };
            let citations: Vec<RankedRecord> = list
                .iter()
                .filter_map(|(pmid, score)| {
                    records.get(pmid).map(|record| RankedRecord {
                        record: record.clone(),
                        similarity_score: *score,
                    })
                })
                .collect();

            if citations.is_empty() {
                debug!(structure_id = %candidate.structure_id, "no fetched record for any score");
                continue;
            }
            ranked.push(RankedEntry {
                candidate,
                citations,
            });
        }
        ranked
    }

    /// Bucket for a recorded annotator: its uppercase initials when they are
    /// on the active roster and not excluded, otherwise the fallback bucket.
    pub fn bucket_for(&self, annotator: Option<&str>, roster: &HashSet<String>) -> String {
        let normalized = annotator.map(|a| a.trim().to_uppercase()).unwrap_or_default();
        if normalized.is_empty()
            || self.excluded.contains(&normalized)
            || !roster.contains(&normalized)
        {
            self.fallback_bucket.clone()
        } else {
            normalized
        }
    }

    /// Groups ranked entries by annotator; multi-entry buckets are ordered
    /// by their entries' best score.
    pub fn group(&self, ranked: Vec<RankedEntry>, roster: &[String]) -> AnnotatorBuckets {
        let roster: HashSet<String> = roster.iter().map(|a| a.trim().to_uppercase()).collect();

        let mut buckets = AnnotatorBuckets::new();
        for entry in ranked {
            let bucket = self.bucket_for(entry.candidate.annotator.as_deref(), &roster);
            buckets.entry(bucket).or_default().push(entry);
        }

        for entries in buckets.values_mut() {
            sort_desc_ties_reversed(entries, RankedEntry::top_score);
        }
        buckets
    }

    pub fn run(
        &self,
        candidates: Vec<CandidateEntry>,
        scores: &[MatchScore],
        records: &HashMap<String, PubmedRecord>,
        roster: &[String],
    ) -> AnnotatorBuckets {
        let ranked = self.rank(candidates, scores, records);
        let ranked_count = ranked.len();
        let buckets = self.group(ranked, roster);
        info!(ranked = ranked_count, buckets = buckets.len(), "ranking complete");
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ids: &[&str]) -> HashMap<String, PubmedRecord> {
        ids.iter()
            .map(|id| (id.to_string(), PubmedRecord::new(*id, format!("Paper {id}"))))
            .collect()
    }

    fn candidate(id: &str, annotator: Option<&str>) -> CandidateEntry {
        let mut c = CandidateEntry::new(id, "t");
        c.annotator = annotator.map(String::from);
        c
    }

    fn roster(initials: &[&str]) -> HashSet<String> {
        initials.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn equal_scores_come_out_reversed() {
        let engine = RankingEngine::default();
        let scores = vec![
            MatchScore::new("S", "A", 0.9),
            MatchScore::new("S", "B", 0.9),
            MatchScore::new("S", "C", 0.7),
        ];
        let ranked = engine.rank(vec![candidate("S", None)], &scores, &records(&["A", "B", "C"]));
        assert_eq!(ranked[0].citation_ids(), vec!["B", "A", "C"]);
    }

    #[test]
    fn strictly_ordered_scores_descend() {
        let engine = RankingEngine::default();
        let scores = vec![
            MatchScore::new("S", "low", 0.1),
            MatchScore::new("S", "high", 0.8),
            MatchScore::new("S", "mid", 0.5),
        ];
        let ranked = engine.rank(vec![candidate("S", None)], &scores, &records(&["low", "mid", "high"]));
        assert_eq!(ranked[0].citation_ids(), vec!["high", "mid", "low"]);
        assert_eq!(ranked[0].top_score(), 0.8);
    }

    #[test]
    fn unknown_records_are_skipped_and_empty_candidates_dropped() {
        let engine = RankingEngine::default();
        let scores = vec![
            MatchScore::new("S1", "missing", 0.99),
            MatchScore::new("S1", "A", 0.4),
            MatchScore::new("S2", "gone", 0.8),
        ];
        let ranked = engine.rank(
            vec![candidate("S1", None), candidate("S2", None), candidate("S3", None)],
            &scores,
            &records(&["A"]),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate.structure_id, "S1");
        assert_eq!(ranked[0].citation_ids(), vec!["A"]);
    }

    #[test]
    fn excluded_annotator_goes_to_other() {
        let engine = RankingEngine::default();
        assert_eq!(engine.bucket_for(Some("jy"), &roster(&["JY", "AB"])), "OTHER");
    }

    #[test]
    fn annotator_off_roster_goes_to_other() {
        let engine = RankingEngine::default();
        assert_eq!(engine.bucket_for(Some("XY"), &roster(&["AB"])), "OTHER");
        assert_eq!(engine.bucket_for(Some(""), &roster(&["AB"])), "OTHER");
        assert_eq!(engine.bucket_for(None, &roster(&["AB"])), "OTHER");
    }

    #[test]
    fn rostered_annotator_keeps_own_bucket() {
        let engine = RankingEngine::default();
        assert_eq!(engine.bucket_for(Some("AB"), &roster(&["AB"])), "AB");
        assert_eq!(engine.bucket_for(Some(" ab "), &roster(&["AB"])), "AB");
    }

    #[test]
    fn buckets_sorted_by_top_score_with_ties_reversed() {
        let engine = RankingEngine::default();
        let scores = vec![
            MatchScore::new("P", "1", 0.5),
            MatchScore::new("Q", "2", 0.9),
            MatchScore::new("R", "3", 0.5),
            MatchScore::new("T", "4", 0.7),
        ];
        let candidates = vec![
            candidate("P", Some("ab")),
            candidate("Q", Some("AB")),
            candidate("R", Some("AB")),
            candidate("T", Some("zz")),
        ];
        let buckets = engine.run(
            candidates,
            &scores,
            &records(&["1", "2", "3", "4"]),
            &["ab".to_string()],
        );

        let ab: Vec<_> = buckets["AB"].iter().map(|e| e.candidate.structure_id.as_str()).collect();
        assert_eq!(ab, vec!["Q", "R", "P"]);
        assert_eq!(buckets["OTHER"].len(), 1);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn fallback_bucket_name_is_uppercased() {
        let engine = RankingEngine::from_config(&RankingConfig {
            excluded_annotators: Vec::new(),
            fallback_bucket: " unassigned ".to_string(),
        });
        assert_eq!(engine.bucket_for(None, &roster(&["AB"])), "UNASSIGNED");
    }

    #[test]
    fn custom_exclusions_and_fallback() {
        let engine = RankingEngine::from_config(&RankingConfig {
            excluded_annotators: vec!["ab".to_string()],
            fallback_bucket: "UNASSIGNED".to_string(),
        });
        assert_eq!(engine.bucket_for(Some("AB"), &roster(&["AB"])), "UNASSIGNED");
        assert_eq!(engine.bucket_for(Some("JY"), &roster(&["JY"])), "JY");
    }
}
