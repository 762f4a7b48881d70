//! Fan-out/fan-in orchestration of bulk deletes and batch creates.
//!
//! Bulk deletes resolve every key on its own task, merge the per-task
//! completions into one stream, and only then issue a single scoped write.
//! Workers never write, so no transaction or connection is shared between
//! them, and a failure in any worker leaves the store untouched.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::{BatchItem, ResultItem};
use crate::storage::{LinkStore, OpContext, StorageError, StorageResult};

/// What a preparation worker learned about one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    /// Key exists and belongs to the caller
    Owned(String),
    /// Key is unknown or belongs to someone else; it is skipped
    Skipped(String),
}

/// Summary of a completed bulk delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub requested: usize,
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct BulkEngine {
    store: Arc<dyn LinkStore>,
}

/// Merge per-worker completion channels into one stream.
///
/// The returned receiver yields once per input and closes only after every
/// forwarding task has finished.
pub fn fan_in<T: Send + 'static>(inputs: Vec<oneshot::Receiver<T>>) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(inputs.len().max(1));

    for input in inputs {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Ok(value) = input.await {
                let _ = tx.send(value).await;
            }
        });
    }

    rx
}

impl BulkEngine {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }

    fn spawn_check(
        &self,
        ctx: &OpContext,
        key: String,
        owner: &str,
    ) -> (JoinHandle<()>, oneshot::Receiver<StorageResult<KeyCheck>>) {
        let (done_tx, done_rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let ctx = ctx.clone();
        let owner = owner.to_string();

        let handle = tokio::spawn(async move {
            let outcome = match store.owner_of(&ctx, &key).await {
                Ok(Some(found)) if found == owner => Ok(KeyCheck::Owned(key)),
                Ok(_) => Ok(KeyCheck::Skipped(key)),
                Err(e) => Err(e),
            };
            let _ = done_tx.send(outcome);
        });

        (handle, done_rx)
    }

    /// Soft-delete `keys` on behalf of `owner`, all or nothing.
    ///
    /// Keys owned by other sessions or unknown keys are skipped, not errors.
    /// Returns only after every spawned worker has finished.
    pub async fn delete(
        &self,
        ctx: &OpContext,
        keys: Vec<String>,
        owner: &str,
    ) -> StorageResult<DeleteReport> {
        ctx.check()?;

        let mut keys = keys;
        keys.sort();
        keys.dedup();

        let requested = keys.len();
        if requested == 0 {
            return Ok(DeleteReport::default());
        }

        let mut workers = Vec::with_capacity(requested);
        let mut completions = Vec::with_capacity(requested);
        for key in keys {
            let (handle, done) = self.spawn_check(ctx, key, owner);
            workers.push(handle);
            completions.push(done);
        }

        let mut merged = fan_in(completions);
        let mut report = DeleteReport {
            requested,
            ..Default::default()
        };
        let mut failure: Option<StorageError> = None;

        // Drain everything so no worker outlives this call, even after a failure
        while let Some(outcome) = merged.recv().await {
            match outcome {
                Ok(KeyCheck::Owned(key)) => report.deleted.push(key),
                Ok(KeyCheck::Skipped(key)) => report.skipped.push(key),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "bulk delete worker panicked");
                failure.get_or_insert_with(|| StorageError::Other(e.into()));
            }
        }

        // Every worker reports exactly once unless it panicked
        if failure.is_none() && report.deleted.len() + report.skipped.len() != requested {
            failure = Some(StorageError::Other(anyhow::anyhow!(
                "bulk delete lost {} worker results",
                requested - report.deleted.len() - report.skipped.len()
            )));
        }

        if let Some(e) = failure {
            tracing::warn!(owner, requested, error = %e, "bulk delete aborted");
            return Err(e);
        }

        if !report.deleted.is_empty() {
            self.store.delete(ctx, &report.deleted, owner).await?;
        }

        tracing::info!(
            owner,
            requested,
            deleted = report.deleted.len(),
            skipped = report.skipped.len(),
            "bulk delete committed"
        );
        Ok(report)
    }

    /// Create every item in one unit. Items are processed in order so keys stay unique.
    pub async fn batch(
        &self,
        ctx: &OpContext,
        items: &[BatchItem],
        owner: &str,
    ) -> StorageResult<Vec<ResultItem>> {
        ctx.check()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.store.batch(ctx, items, owner).await?;
        tracing::info!(owner, items = items.len(), "batch created");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ShortLink, Shortened};
    use crate::storage::{MemoryStore, StoreSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(StoreSettings::new("localhost", 9)))
    }

    #[tokio::test]
    async fn test_fan_in_closes_after_all_inputs() {
        let mut senders = vec![];
        let mut receivers = vec![];
        for _ in 0..5 {
            let (tx, rx) = oneshot::channel::<usize>();
            senders.push(tx);
            receivers.push(rx);
        }

        let mut merged = fan_in(receivers);
        for (i, tx) in senders.into_iter().enumerate() {
            tx.send(i).unwrap();
        }

        let mut seen = vec![];
        while let Some(v) = merged.recv().await {
            seen.push(v);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fan_in_skips_dropped_senders() {
        let (tx, rx) = oneshot::channel::<u8>();
        let (dropped, rx2) = oneshot::channel::<u8>();
        drop(dropped);
        tx.send(7).unwrap();

        let mut merged = fan_in(vec![rx, rx2]);
        assert_eq!(merged.recv().await, Some(7));
        assert_eq!(merged.recv().await, None);
    }

    #[tokio::test]
    async fn test_delete_only_touches_owned_keys() {
        let store = memory();
        let engine = BulkEngine::new(store.clone());
        let ctx = OpContext::new();

        let mine = store.create(&ctx, "https://mine.example", "me").await.unwrap().key;
        let theirs = store.create(&ctx, "https://theirs.example", "them").await.unwrap().key;

        let report = engine
            .delete(&ctx, vec![mine.clone(), theirs.clone(), "unknown00".to_string()], "me")
            .await
            .unwrap();

        assert_eq!(report.requested, 3);
        assert_eq!(report.deleted, vec![mine.clone()]);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(store.get(&ctx, &mine).await, Err(StorageError::Gone)));
        assert_eq!(store.get(&ctx, &theirs).await.unwrap(), "https://theirs.example");
    }

    #[tokio::test]
    async fn test_delete_many_keys_concurrently() {
        let store = memory();
        let engine = BulkEngine::new(store.clone());
        let ctx = OpContext::new();

        let mut keys = vec![];
        for i in 0..100 {
            keys.push(
                store
                    .create(&ctx, &format!("https://example.com/{i}"), "owner")
                    .await
                    .unwrap()
                    .key,
            );
        }

        let report = engine.delete(&ctx, keys.clone(), "owner").await.unwrap();
        assert_eq!(report.deleted.len(), 100);
        for key in keys {
            assert!(store.get_raw(&key).unwrap().removed);
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_collapsed() {
        let store = memory();
        let engine = BulkEngine::new(store.clone());
        let ctx = OpContext::new();
        let key = store.create(&ctx, "https://a.example", "o").await.unwrap().key;

        let report = engine
            .delete(&ctx, vec![key.clone(), key.clone()], "o")
            .await
            .unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(report.deleted, vec![key]);
    }

    /// Fails ownership lookups for one poisoned key and counts writes
    struct FlakyStore {
        inner: MemoryStore,
        poisoned: String,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl LinkStore for FlakyStore {
        async fn create(&self, ctx: &OpContext, target: &str, owner: &str) -> StorageResult<Shortened> {
            self.inner.create(ctx, target, owner).await
        }
        async fn get(&self, ctx: &OpContext, key: &str) -> StorageResult<String> {
            self.inner.get(ctx, key).await
        }
        async fn find(&self, ctx: &OpContext, target: &str) -> StorageResult<String> {
            self.inner.find(ctx, target).await
        }
        async fn list_by_owner(&self, ctx: &OpContext, owner: &str) -> StorageResult<Vec<ShortLink>> {
            self.inner.list_by_owner(ctx, owner).await
        }
        async fn batch(
            &self,
            ctx: &OpContext,
            items: &[BatchItem],
            owner: &str,
        ) -> StorageResult<Vec<ResultItem>> {
            self.inner.batch(ctx, items, owner).await
        }
        async fn delete(&self, ctx: &OpContext, keys: &[String], owner: &str) -> StorageResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(ctx, keys, owner).await
        }
        async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>> {
            if key == self.poisoned {
                return Err(StorageError::Unavailable("connection reset".to_string()));
            }
            self.inner.owner_of(ctx, key).await
        }
        async fn ping(&self, ctx: &OpContext) -> StorageResult<()> {
            self.inner.ping(ctx).await
        }
        fn host(&self) -> String {
            self.inner.host()
        }
    }

    #[tokio::test]
    async fn test_worker_failure_aborts_whole_delete() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(StoreSettings::new("localhost", 9)),
            poisoned: "poisoned0".to_string(),
            deletes: AtomicUsize::new(0),
        });
        let engine = BulkEngine::new(store.clone());
        let ctx = OpContext::new();
        let key = store.create(&ctx, "https://a.example", "o").await.unwrap().key;

        let result = engine
            .delete(&ctx, vec![key.clone(), "poisoned0".to_string()], "o")
            .await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(&ctx, &key).await.unwrap(), "https://a.example");
    }

    #[tokio::test]
    async fn test_cancelled_delete_spawns_nothing() {
        let store = memory();
        let engine = BulkEngine::new(store.clone());
        let ctx = OpContext::new();
        let key = store.create(&ctx, "https://a.example", "o").await.unwrap().key;

        let cancelled = OpContext::new();
        cancelled.cancel();
        let result = engine.delete(&cancelled, vec![key.clone()], "o").await;

        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(!store.get_raw(&key).unwrap().removed);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let engine = BulkEngine::new(memory());
        let results = engine.batch(&OpContext::new(), &[], "o").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_batch_echoes_correlation_ids() {
        let store = memory();
        let engine = BulkEngine::new(store.clone());
        let items = vec![
            BatchItem {
                correlation_id: "x".to_string(),
                original_url: "https://x.example".to_string(),
            },
            BatchItem {
                correlation_id: "x".to_string(),
                original_url: "https://y.example".to_string(),
            },
        ];

        let results = engine.batch(&OpContext::new(), &items, "o").await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.correlation_id == "x"));
        assert_ne!(results[0].short_url, results[1].short_url);
        assert!(results[0].short_url.starts_with("http://localhost/"));
    }
}
