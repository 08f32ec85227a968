use async_trait::async_trait;
use citescout_core::{PubmedRecord, SearchTerm};

use crate::error::Result;

pub mod pubmed;

/// Bibliographic index lookup: one query term to zero or more record ids.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, term: &SearchTerm) -> Result<Vec<String>>;
}

/// Record lookup by id; `None` when the service has no such record.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn fetch(&self, pmid: &str) -> Result<Option<PubmedRecord>>;
}
