use crate::models::ShortUrl;
use crate::storage::memory::UrlIndex;
use crate::storage::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;

struct FileState {
    index: UrlIndex,
    // Unbuffered: a line that failed to reach the file must not linger and
    // ride along with the next append.
    writer: File,
}

/// Log-file backend: an in-memory index rehydrated from, and appended to, a
/// newline-delimited JSON file.
///
/// The file is write-only history and is never compacted. Batches are not
/// atomic: records created before a failure stay durable.
pub struct FileStorage {
    path: PathBuf,
    state: RwLock<FileState>,
}

impl FileStorage {
    /// Open (creating if needed) the log at `path` and replay every line.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await?;

        let mut index = UrlIndex::default();
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let url: ShortUrl = serde_json::from_str(&line).map_err(|source| {
                StorageError::Corrupt {
                    line: line_no,
                    source,
                }
            })?;
            index.restore(url);
        }

        tracing::info!(
            path = %path.display(),
            records = index.len(),
            last_id = index.last_id(),
            "rehydrated file storage"
        );

        let file = lines.into_inner().into_inner();
        Ok(Self {
            path,
            state: RwLock::new(FileState {
                index,
                writer: file,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn append_line<W>(writer: &mut W, url: &ShortUrl) -> StorageResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(url)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn create(&self, url: ShortUrl) -> StorageResult<ShortUrl> {
        let mut state = self.state.write().await;
        let created = state.index.insert(url)?;

        if let Err(e) = append_line(&mut state.writer, &created).await {
            // Reads must not see a record the log never received.
            state.index.remove(&created.id);
            tracing::error!(id = %created.id, error = %e, "failed to append short url to log");
            return Err(e);
        }

        tracing::debug!(id = %created.id, "appended short url to log");
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<ShortUrl> {
        self.state.read().await.index.get(id)
    }

    async fn find_by_user_id(&self, user_id: &str) -> StorageResult<Vec<ShortUrl>> {
        Ok(self.state.read().await.index.find_by_user(user_id))
    }

    async fn create_batch(&self, urls: Vec<ShortUrl>) -> StorageResult<Vec<ShortUrl>> {
        let mut created = Vec::with_capacity(urls.len());
        for url in urls {
            created.push(self.create(url).await?);
        }
        Ok(created)
    }

    async fn delete_batch(&self, user_id: &str, ids: Vec<String>) -> StorageResult<()> {
        tracing::debug!(user_id, count = ids.len(), "ignoring delete request in file storage");
        Ok(())
    }
}
