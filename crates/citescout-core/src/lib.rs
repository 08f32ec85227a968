pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use models::*;

pub use storage::candidates::{CandidateSource, SqliteCandidateStore};
pub use storage::connection::ConnectionPool;
pub use storage::results::ResultStore;
pub use storage::{open_database, open_in_memory, schema_version};
