use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use citescout_core::{PubmedRecord, SearchTerm, TermMatchMap};
use tracing::{debug, info, warn};

use crate::http::RateGate;
use crate::pool::{PoolOptions, WorkerPool};
use crate::sources::RecordService;

/// Below this many ids the fetch runs inline, without a worker pool.
pub const DEFAULT_SEQUENTIAL_BELOW: usize = 201;

/// Ids per worker-visible batch.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Union of every term's ids, walking `terms` in order and keeping the
/// first occurrence of each id.
pub fn unique_record_ids(terms: &[SearchTerm], matches: &TermMatchMap) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut ids = Vec::new();
    for ids_for_term in terms.iter().filter_map(|t| matches.get(t)) {
        for id in ids_for_term {
            if seen.insert(id.as_str()) {
                ids.push(id.clone());
            }
        }
    }
    ids
}

/// Resolves record ids to full records through the shared rate gate.
pub struct RecordFetchStage {
    service: Arc<dyn RecordService>,
    gate: Arc<RateGate>,
    options: PoolOptions,
    sequential_below: usize,
}

impl RecordFetchStage {
    /// `options.rate_bound` is replaced by `ceil(2 × R)`.
    pub fn new(service: Arc<dyn RecordService>, gate: Arc<RateGate>, options: PoolOptions) -> Self {
        let options = PoolOptions {
            rate_bound: gate.worker_bound(2.0),
            ..options
        };
        Self {
            service,
            gate,
            options,
            sequential_below: DEFAULT_SEQUENTIAL_BELOW,
        }
    }

    pub fn with_sequential_below(mut self, threshold: usize) -> Self {
        self.sequential_below = threshold;
        self
    }

    /// Whether `count` ids are fetched through a worker pool.
    pub fn uses_pool(&self, count: usize) -> bool {
        count >= self.sequential_below
    }

    /// Records keyed by the requested id. Ids the service cannot resolve are
    /// absent; on duplicate ids the last fetched record wins.
    pub async fn run(&self, ids: &[String]) -> HashMap<String, PubmedRecord> {
        let mut records = HashMap::new();
        if ids.is_empty() {
            return records;
        }

        let fetched: Vec<(String, PubmedRecord)> = if self.uses_pool(ids.len()) {
            let service = Arc::clone(&self.service);
            let gate = Arc::clone(&self.gate);
            let handler = move |batch: Vec<String>| {
                let service = Arc::clone(&service);
                let gate = Arc::clone(&gate);
                async move { fetch_batch(service.as_ref(), &gate, batch).await }
            };

            let mut pool = WorkerPool::new("fetch", self.options.clone());
            let results = pool.run(ids.to_vec(), handler).await;
            debug!(workers = pool.workers(), batches = results.len(), "parallel fetch finished");
            results.into_iter().flat_map(|r| r.items).collect()
        } else {
            debug!(ids = ids.len(), "fetching sequentially");
            fetch_batch(self.service.as_ref(), &self.gate, ids.to_vec()).await
        };

        for (id, record) in fetched {
            records.insert(id, record);
        }

        info!(requested = ids.len(), fetched = records.len(), "record fetch complete");
        records
    }
}

async fn fetch_batch(
    service: &dyn RecordService,
    gate: &RateGate,
    batch: Vec<String>,
) -> Vec<(String, PubmedRecord)> {
    let mut out = Vec::with_capacity(batch.len());
    for id in batch {
        gate.acquire().await;
        match service.fetch(&id).await {
            Ok(Some(record)) => out.push((id, record)),
            Ok(None) => debug!(pmid = %id, "record not found"),
            Err(e) => warn!(pmid = %id, error = %e, "fetch failed, skipping record"),
        }
    }
    out
}
