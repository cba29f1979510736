use crate::models::ShortUrl;
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Id-keyed map plus the counter used for id assignment.
///
/// Shared by the memory and log-file backends; callers provide the locking.
#[derive(Debug, Default)]
pub(crate) struct UrlIndex {
    urls: HashMap<String, ShortUrl>,
    last_id: u64,
}

impl UrlIndex {
    /// Insert a new record. The counter advances even when the insert
    /// collides, so assigned ids are never handed out twice.
    pub(crate) fn insert(&mut self, mut url: ShortUrl) -> StorageResult<ShortUrl> {
        self.last_id += 1;
        if url.id.is_empty() {
            url.id = self.last_id.to_string();
        }

        if let Some(existing) = self.urls.get(&url.id) {
            return Err(StorageError::already_exists(existing.clone()));
        }

        self.urls.insert(url.id.clone(), url.clone());
        Ok(url)
    }

    /// Load a record read back from persistent history.
    pub(crate) fn restore(&mut self, url: ShortUrl) {
        if let Ok(id) = url.id.parse::<u64>() {
            self.last_id = self.last_id.max(id);
        }
        self.urls.insert(url.id.clone(), url);
    }

    pub(crate) fn remove(&mut self, id: &str) {
        self.urls.remove(id);
    }

    pub(crate) fn get(&self, id: &str) -> StorageResult<ShortUrl> {
        self.urls.get(id).cloned().ok_or(StorageError::NotFound)
    }

    pub(crate) fn find_by_user(&self, user_id: &str) -> Vec<ShortUrl> {
        if user_id.is_empty() {
            return Vec::new();
        }

        self.urls
            .values()
            .filter(|url| url.user_id == user_id)
            .cloned()
            .collect()
    }

    pub(crate) fn last_id(&self) -> u64 {
        self.last_id
    }

    pub(crate) fn len(&self) -> usize {
        self.urls.len()
    }
}

/// Volatile backend: everything lives in process memory and is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    index: RwLock<UrlIndex>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, url: ShortUrl) -> StorageResult<ShortUrl> {
        let created = self.index.write().insert(url)?;
        tracing::debug!(id = %created.id, "stored short url in memory");
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<ShortUrl> {
        self.index.read().get(id)
    }

    async fn find_by_user_id(&self, user_id: &str) -> StorageResult<Vec<ShortUrl>> {
        Ok(self.index.read().find_by_user(user_id))
    }

    async fn create_batch(&self, urls: Vec<ShortUrl>) -> StorageResult<Vec<ShortUrl>> {
        let mut created = Vec::with_capacity(urls.len());
        for url in urls {
            created.push(self.create(url).await?);
        }
        Ok(created)
    }

    // Nothing is ever deleted from the volatile backend.
    async fn delete_batch(&self, user_id: &str, ids: Vec<String>) -> StorageResult<()> {
        tracing::debug!(user_id, count = ids.len(), "ignoring delete request in memory storage");
        Ok(())
    }
}
