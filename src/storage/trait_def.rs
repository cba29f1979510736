use crate::models::ShortUrl;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short url not found")]
    NotFound,
    /// The record collides with one already stored. `existing` holds the
    /// stored record when the backend can report it: the one under the same
    /// id for the in-process backends, the one with the same long URL for
    /// the relational ones.
    #[error("short url already exists")]
    AlreadyExists { existing: Option<Box<ShortUrl>> },
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("deletion queue is closed")]
    Closed,
    #[error("corrupt record on line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub fn already_exists(existing: ShortUrl) -> Self {
        Self::AlreadyExists {
            existing: Some(Box::new(existing)),
        }
    }

    /// The previously stored record carried by an `AlreadyExists` error.
    pub fn existing(&self) -> Option<&ShortUrl> {
        match self {
            Self::AlreadyExists {
                existing: Some(existing),
            } => Some(existing),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage contract shared by the memory, log-file and relational backends.
///
/// Futures returned here are cancelled by dropping them. Backends that cross
/// a process boundary also bound every call with their configured timeout.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Provision the backing schema. No-op for backends without one.
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Store a record, assigning an id when `url.id` is empty.
    async fn create(&self, url: ShortUrl) -> StorageResult<ShortUrl>;

    /// Fetch a record by short id. Soft-deleted records are returned with
    /// `is_deleted` set.
    async fn get_by_id(&self, id: &str) -> StorageResult<ShortUrl>;

    /// All live records owned by `user_id`, in no particular order.
    async fn find_by_user_id(&self, user_id: &str) -> StorageResult<Vec<ShortUrl>>;

    /// Store several records. The result keeps the input order.
    async fn create_batch(&self, urls: Vec<ShortUrl>) -> StorageResult<Vec<ShortUrl>>;

    /// Request soft deletion of `ids` owned by `user_id`. Returns once the
    /// request is accepted; the mutation happens in the background.
    async fn delete_batch(&self, user_id: &str, ids: Vec<String>) -> StorageResult<()>;

    /// Check connectivity of the durable layer.
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Drain background work before the process exits.
    async fn shutdown(&self) {}
}
