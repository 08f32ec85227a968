use std::sync::Arc;

use citescout_core::{SearchTerm, TermMatchMap};
use tracing::{info, warn};

use crate::http::RateGate;
use crate::pool::{PoolOptions, WorkerPool};
use crate::sources::SearchService;

/// Resolves search terms to record ids through the shared rate gate.
pub struct TermSearchStage {
    service: Arc<dyn SearchService>,
    gate: Arc<RateGate>,
    options: PoolOptions,
}

impl TermSearchStage {
    /// `options.rate_bound` is replaced by the gate's `ceil(R)`.
    pub fn new(service: Arc<dyn SearchService>, gate: Arc<RateGate>, options: PoolOptions) -> Self {
        let options = PoolOptions {
            rate_bound: gate.worker_bound(1.0),
            ..options
        };
        Self {
            service,
            gate,
            options,
        }
    }

    /// Every term is searched exactly once. Terms with no hits, or whose
    /// search failed, are absent from the result.
    pub async fn run(&self, terms: &[SearchTerm]) -> TermMatchMap {
        let mut matches = TermMatchMap::new();
        if terms.is_empty() {
            return matches;
        }

        let service = Arc::clone(&self.service);
        let gate = Arc::clone(&self.gate);
        let handler = move |batch: Vec<SearchTerm>| {
            let service = Arc::clone(&service);
            let gate = Arc::clone(&gate);
            async move { search_batch(service.as_ref(), &gate, batch).await }
        };

        let mut pool = WorkerPool::new("search", self.options.clone());
        let results = pool.run(terms.to_vec(), handler).await;

        for (term, ids) in results.into_iter().flat_map(|r| r.items) {
            if !ids.is_empty() {
                matches.insert(term, ids);
            }
        }

        info!(
            terms = terms.len(),
            with_hits = matches.len(),
            workers = pool.workers(),
            "term search complete"
        );
        matches
    }
}

async fn search_batch(
    service: &dyn SearchService,
    gate: &RateGate,
    batch: Vec<SearchTerm>,
) -> Vec<(SearchTerm, Vec<String>)> {
    let mut out = Vec::with_capacity(batch.len());
    for term in batch {
        gate.acquire().await;
        match service.search(&term).await {
            Ok(ids) => out.push((term, ids)),
            Err(e) => warn!(term = %term, error = %e, "search failed, treating as no hits"),
        }
    }
    out
}
