pub mod deletion;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use deletion::{DeletionQueue, DeletionQueueConfig, DeletionSink};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

use crate::models::ShortUrl;
use sqlx::FromRow;
use std::future::Future;
use std::time::Duration;

/// Settings shared by the SQL-backed storages.
#[derive(Debug, Clone, Copy)]
pub struct RelationalOptions {
    pub max_connections: u32,
    /// Upper bound for every database round trip, including background deletions.
    pub timeout: Duration,
    pub deletion: DeletionQueueConfig,
}

impl Default for RelationalOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            timeout: Duration::from_secs(3),
            deletion: DeletionQueueConfig::default(),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UrlRow {
    id: i64,
    url: String,
    user_id: Option<String>,
    correlation_id: Option<String>,
    is_deleted: bool,
}

impl From<UrlRow> for ShortUrl {
    fn from(row: UrlRow) -> Self {
        Self {
            id: row.id.to_string(),
            long_url: row.url,
            user_id: row.user_id.unwrap_or_default(),
            correlation_id: row.correlation_id.unwrap_or_default(),
            is_deleted: row.is_deleted,
        }
    }
}

pub(crate) async fn with_timeout<T, F>(limit: Duration, operation: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| StorageError::Timeout(limit))?
}

/// Empty owner and correlation fields are stored as NULL.
pub(crate) fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Short ids of the relational backends are database integers; anything else
/// cannot name a row.
pub(crate) fn parse_row_ids(ids: &[String]) -> Vec<i64> {
    ids.iter().filter_map(|id| id.parse().ok()).collect()
}
