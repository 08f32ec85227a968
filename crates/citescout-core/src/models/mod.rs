pub mod candidate;
pub mod ranked;
pub mod record;

pub use candidate::{CandidateEntry, SearchTerm, TermKind, author_search_key};
pub use ranked::{AnnotatorBuckets, MatchScore, RankedEntry, RankedRecord};
pub use record::{PubmedRecord, TermMatchMap};
