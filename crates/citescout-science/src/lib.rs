//! PubMed discovery, record fetch, external matching and ranking for citescout.

pub mod aggregator;
pub mod error;
pub mod exchange;
pub mod fetch;
pub mod http;
pub mod identifiers;
pub mod matcher;
pub mod pipeline;
pub mod pool;
pub mod ranking;
pub mod search;
pub mod sources;

pub use aggregator::{CandidateAggregator, CandidateSet};
pub use error::{Result, ScienceError};
pub use exchange::{ExchangeData, ExchangeWriter, MatchResultReader};
pub use fetch::RecordFetchStage;
pub use http::RateGate;
pub use matcher::{Correlator, ExternalMatcher};
pub use pipeline::{CitationPipeline, PipelineReport};
pub use pool::{PoolOptions, PoolState, WorkerPool};
pub use ranking::RankingEngine;
pub use search::TermSearchStage;
pub use sources::{RecordService, SearchService};
