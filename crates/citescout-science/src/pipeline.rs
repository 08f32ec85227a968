//! End-to-end citation discovery run.
//!
//! Orchestrates one batch job:
//!   1. Load candidates and derive search terms
//!   2. Search every term (worker pool, rate gated)
//!   3. Fetch the union of hit ids (inline below the pool threshold)
//!   4. Hand candidates, hits and records to the correlator
//!   5. Rank, bucket by annotator and persist
//!
//! Search and fetch each get their own pool and never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use citescout_core::{AnnotatorBuckets, AppConfig, CandidateSource, ResultStore};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::CandidateAggregator;
use crate::error::Result;
use crate::exchange::ExchangeData;
use crate::fetch::{RecordFetchStage, unique_record_ids};
use crate::http::RateGate;
use crate::matcher::{Correlator, ExternalMatcher};
use crate::pool::{PoolOptions, default_parallelism_bound};
use crate::ranking::RankingEngine;
use crate::search::TermSearchStage;
use crate::sources::pubmed::PubMedClient;
use crate::sources::{RecordService, SearchService};

/// Counts gathered during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub candidates: usize,
    pub terms: usize,
    pub terms_with_hits: usize,
    pub record_ids: usize,
    pub records_fetched: usize,
    pub match_rows: usize,
    pub ranked: usize,
    pub buckets: BTreeMap<String, usize>,
}

pub struct CitationPipeline {
    source: Arc<dyn CandidateSource>,
    search: TermSearchStage,
    fetch: RecordFetchStage,
    correlator: Arc<dyn Correlator>,
    ranking: RankingEngine,
    store: Option<Arc<ResultStore>>,
}

impl CitationPipeline {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        search: TermSearchStage,
        fetch: RecordFetchStage,
        correlator: Arc<dyn Correlator>,
        ranking: RankingEngine,
    ) -> Self {
        Self {
            source,
            search,
            fetch,
            correlator,
            ranking,
            store: None,
        }
    }

    /// Wires stages from config around caller-supplied services.
    pub fn with_services(
        cfg: &AppConfig,
        source: Arc<dyn CandidateSource>,
        search_service: Arc<dyn SearchService>,
        record_service: Arc<dyn RecordService>,
        correlator: Arc<dyn Correlator>,
        gate: Arc<RateGate>,
    ) -> Self {
        let parallelism = default_parallelism_bound(cfg.pool.max_workers);
        let grace = Duration::from_millis(cfg.pool.shutdown_grace_ms);

        let search_options = PoolOptions::new(cfg.pool.search_batch_size, 1)
            .with_parallelism_bound(parallelism)
            .with_shutdown_grace(grace);
        let fetch_options = PoolOptions::new(cfg.pool.fetch_chunk_size, 1)
            .with_parallelism_bound(parallelism)
            .with_shutdown_grace(grace);

        let search = TermSearchStage::new(search_service, Arc::clone(&gate), search_options);
        let fetch = RecordFetchStage::new(record_service, gate, fetch_options)
            .with_sequential_below(cfg.pool.fetch_sequential_below);

        Self::new(
            source,
            search,
            fetch,
            correlator,
            RankingEngine::from_config(&cfg.ranking),
        )
    }

    /// PubMed for search and fetch, the configured external matcher for
    /// scoring. One gate paces both services.
    pub fn from_config(cfg: &AppConfig, source: Arc<dyn CandidateSource>) -> Result<Self> {
        let api_key = cfg.pubmed.resolve_api_key();
        if api_key.is_none() {
            warn!("no NCBI API key configured, limiting to 1 request per second");
        }
        let gate = Arc::new(RateGate::for_pubmed(&cfg.pubmed, api_key.as_deref()));
        let client = Arc::new(PubMedClient::new(&cfg.pubmed, api_key)?);
        let correlator = Arc::new(ExternalMatcher::from_config(cfg));

        info!(rate = gate.rate(), "pubmed rate gate ready");
        Ok(Self::with_services(
            cfg,
            source,
            client.clone(),
            client,
            correlator,
            gate,
        ))
    }

    pub fn with_store(mut self, store: Arc<ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self) -> Result<(AnnotatorBuckets, PipelineReport)> {
        let run_id = Uuid::now_v7();
        info!(%run_id, "citation discovery run started");

        let set = CandidateAggregator::new(self.source.as_ref()).load()?;
        let roster = self.source.active_annotators()?;

        let matches = self.search.run(&set.terms).await;
        let ids = unique_record_ids(&set.terms, &matches);
        let records = self.fetch.run(&ids).await;

        let exchange = ExchangeData::build(&set.candidates, &set.terms, &matches, &records);
        let scores = self.correlator.correlate(&exchange).await?;

        let mut report = PipelineReport {
            run_id,
            candidates: set.candidates.len(),
            terms: set.terms.len(),
            terms_with_hits: matches.len(),
            record_ids: ids.len(),
            records_fetched: records.len(),
            match_rows: scores.len(),
            ..Default::default()
        };

        let buckets = self.ranking.run(set.candidates, &scores, &records, &roster);
        report.ranked = buckets.values().map(Vec::len).sum();
        report.buckets = buckets.iter().map(|(k, v)| (k.clone(), v.len())).collect();

        if let Some(store) = &self.store {
            store.save(run_id, &buckets)?;
        }

        info!(
            %run_id,
            candidates = report.candidates,
            records = report.records_fetched,
            ranked = report.ranked,
            buckets = report.buckets.len(),
            "citation discovery run finished"
        );
        Ok((buckets, report))
    }
}
