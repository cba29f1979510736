use crate::storage::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Applies soft deletions on behalf of the background worker.
#[async_trait]
pub trait DeletionSink: Send + Sync + 'static {
    /// Mark `ids` owned by `user_id` as deleted and return how many rows changed.
    async fn soft_delete(&self, user_id: &str, ids: &[String]) -> StorageResult<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub user_id: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeletionQueueConfig {
    /// Pending requests held before `enqueue` starts waiting for the worker.
    pub capacity: usize,
    /// Requests coalesced into one pass of the worker.
    pub max_batch: usize,
}

impl Default for DeletionQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_batch: 64,
        }
    }
}

/// Bounded queue of deletion requests drained by a single worker task.
///
/// Senders wait while the queue is full; nothing is dropped. `shutdown`
/// closes the queue, lets the worker finish every pending request and then
/// waits for it to exit.
pub struct DeletionQueue {
    sender: mpsc::Sender<DeleteRequest>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeletionQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn DeletionSink>, config: DeletionQueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_worker(
            sink,
            receiver,
            shutdown_rx,
            config.max_batch.max(1),
        ));

        Self {
            sender,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub async fn enqueue(&self, user_id: &str, ids: Vec<String>) -> StorageResult<()> {
        // Unowned records can never match a deletion.
        if user_id.is_empty() || ids.is_empty() {
            return Ok(());
        }
        if *self.shutdown_tx.borrow() {
            return Err(StorageError::Closed);
        }

        self.sender
            .send(DeleteRequest {
                user_id: user_id.to_string(),
                ids,
            })
            .await
            .map_err(|_| StorageError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "deletion worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    sink: Arc<dyn DeletionSink>,
    mut receiver: mpsc::Receiver<DeleteRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_batch: usize,
) {
    tracing::debug!("deletion worker started");

    loop {
        tokio::select! {
            biased;
            // Also fires when the queue owner is dropped.
            _ = shutdown_rx.changed() => break,
            received = receiver.recv() => match received {
                Some(first) => {
                    let batch = collect_batch(first, &mut receiver, max_batch);
                    apply_batch(sink.as_ref(), batch).await;
                }
                None => break,
            }
        }
    }

    receiver.close();
    let mut drained = 0;
    while let Some(first) = receiver.recv().await {
        let batch = collect_batch(first, &mut receiver, max_batch);
        drained += batch.len();
        apply_batch(sink.as_ref(), batch).await;
    }

    tracing::info!(drained, "deletion worker stopped");
}

fn collect_batch(
    first: DeleteRequest,
    receiver: &mut mpsc::Receiver<DeleteRequest>,
    max_batch: usize,
) -> Vec<DeleteRequest> {
    let mut batch = vec![first];
    while batch.len() < max_batch {
        match receiver.try_recv() {
            Ok(request) => batch.push(request),
            Err(_) => break,
        }
    }
    batch
}

/// Merge requests per user, keeping first-seen order of users and ids.
fn group_by_user(batch: Vec<DeleteRequest>) -> Vec<(String, Vec<String>)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();

    for request in batch {
        let pos = *positions.entry(request.user_id.clone()).or_insert_with(|| {
            grouped.push((request.user_id.clone(), Vec::new()));
            grouped.len() - 1
        });

        let ids = &mut grouped[pos].1;
        for id in request.ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    grouped
}

async fn apply_batch(sink: &dyn DeletionSink, batch: Vec<DeleteRequest>) {
    for (user_id, ids) in group_by_user(batch) {
        match sink.soft_delete(&user_id, &ids).await {
            Ok(affected) => {
                tracing::debug!(user_id = %user_id, requested = ids.len(), affected, "soft-deleted short urls");
            }
            // No caller is left to report to.
            Err(e) => {
                tracing::error!(user_id = %user_id, requested = ids.len(), error = %e, "failed to soft-delete short urls");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        calls: parking_lot::Mutex<Vec<(String, Vec<String>)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl DeletionSink for RecordingSink {
        async fn soft_delete(&self, user_id: &str, ids: &[String]) -> StorageResult<u64> {
            if self.fail_for.as_deref() == Some(user_id) {
                return Err(StorageError::Timeout(Duration::from_millis(1)));
            }
            self.calls.lock().push((user_id.to_string(), ids.to_vec()));
            Ok(ids.len() as u64)
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_requests() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DeletionQueue::spawn(sink.clone(), DeletionQueueConfig::default());

        queue.enqueue("alice", ids(&["1", "2"])).await.unwrap();
        queue.enqueue("bob", ids(&["3"])).await.unwrap();
        queue.shutdown().await;

        let calls = sink.calls.lock().clone();
        let total: usize = calls.iter().map(|(_, ids)| ids.len()).sum();
        assert_eq!(total, 3);
        assert!(calls.iter().any(|(user, ids)| user == "alice" && ids.contains(&"2".to_string())));
        assert!(calls.iter().any(|(user, ids)| user == "bob" && ids == &["3".to_string()]));
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DeletionQueue::spawn(sink, DeletionQueueConfig::default());
        queue.shutdown().await;

        let err = queue.enqueue("alice", ids(&["1"])).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn test_empty_requests_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let queue = DeletionQueue::spawn(sink.clone(), DeletionQueueConfig::default());

        queue.enqueue("", ids(&["1"])).await.unwrap();
        queue.enqueue("alice", Vec::new()).await.unwrap();
        queue.shutdown().await;

        assert!(sink.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_stop_the_worker() {
        let sink = Arc::new(RecordingSink {
            fail_for: Some("mallory".to_string()),
            ..RecordingSink::default()
        });
        let queue = DeletionQueue::spawn(
            sink.clone(),
            DeletionQueueConfig {
                capacity: 1,
                max_batch: 1,
            },
        );

        queue.enqueue("mallory", ids(&["1"])).await.unwrap();
        queue.enqueue("alice", ids(&["2"])).await.unwrap();
        queue.shutdown().await;

        assert_eq!(*sink.calls.lock(), vec![("alice".to_string(), ids(&["2"]))]);
    }

    #[test]
    fn test_group_by_user_merges_and_dedupes() {
        let batch = vec![
            DeleteRequest {
                user_id: "alice".to_string(),
                ids: ids(&["1", "2", "1"]),
            },
            DeleteRequest {
                user_id: "bob".to_string(),
                ids: ids(&["9"]),
            },
            DeleteRequest {
                user_id: "alice".to_string(),
                ids: ids(&["2", "3"]),
            },
        ];

        let grouped = group_by_user(batch);
        assert_eq!(
            grouped,
            vec![
                ("alice".to_string(), ids(&["1", "2", "3"])),
                ("bob".to_string(), ids(&["9"])),
            ]
        );
    }
}
