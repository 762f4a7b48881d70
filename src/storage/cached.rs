use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::{LinkStore, OpContext, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cached resolution of a short key
#[derive(Debug, Clone)]
enum Resolved {
    Active(String),
    Removed,
}

/// Read-through cache in front of a slower store.
///
/// Only successful lookups are cached; unknown keys always reach the inner store
/// because they may be allocated later.
///
/// A lookup that overlapped a delete is not published: every delete bumps
/// `delete_epoch` before and after its write, and readers only insert when the
/// epoch they saw before reading is still current.
pub struct CachedStore {
    /// Underlying storage implementation
    inner: Arc<dyn LinkStore>,
    /// Key -> target cache (Moka cache)
    read_cache: Cache<String, Resolved>,
    /// Bumped around every delete
    delete_epoch: AtomicU64,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn LinkStore>, max_cache_entries: u64, ttl: Duration) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(ttl)
            .build();

        Self {
            inner,
            read_cache,
            delete_epoch: AtomicU64::new(0),
        }
    }

    fn epoch(&self) -> u64 {
        self.delete_epoch.load(Ordering::SeqCst)
    }

    /// Cache `value` unless a delete started or finished since `seen`.
    async fn publish(&self, seen: u64, key: &str, value: Resolved) {
        if self.epoch() != seen {
            return;
        }
        self.read_cache.insert(key.to_string(), value).await;

        // A delete that began while inserting may have invalidated before us
        if self.epoch() != seen {
            self.read_cache.invalidate(key).await;
        }
    }
}

#[async_trait]
impl LinkStore for CachedStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create(&self, ctx: &OpContext, target: &str, owner: &str) -> StorageResult<Shortened> {
        let seen = self.epoch();
        let shortened = self.inner.create(ctx, target, owner).await?;

        if shortened.created {
            self.publish(seen, &shortened.key, Resolved::Active(target.to_string()))
                .await;
        }

        Ok(shortened)
    }

    async fn get(&self, ctx: &OpContext, key: &str) -> StorageResult<String> {
        ctx.check()?;

        if let Some(cached) = self.read_cache.get(key).await {
            return match cached {
                Resolved::Active(target) => Ok(target),
                Resolved::Removed => Err(StorageError::Gone),
            };
        }

        // Cache miss - fetch from underlying storage
        let seen = self.epoch();
        match self.inner.get(ctx, key).await {
            Ok(target) => {
                self.publish(seen, key, Resolved::Active(target.clone())).await;
                Ok(target)
            }
            Err(StorageError::Gone) => {
                self.publish(seen, key, Resolved::Removed).await;
                Err(StorageError::Gone)
            }
            Err(e) => Err(e),
        }
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
        self.delete_epoch.fetch_add(1, Ordering::SeqCst);
        let written = self.inner.delete(ctx, keys, owner).await;
        self.delete_epoch.fetch_add(1, Ordering::SeqCst);
        written?;

        // Invalidate after the write so readers never see a stale active entry
        for key in keys {
            self.read_cache.invalidate(key).await;
        }

        Ok(())
    }

    async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>> {
        self.inner.owner_of(ctx, key).await
    }

    async fn ping(&self, ctx: &OpContext) -> StorageResult<()> {
        self.inner.ping(ctx).await
    }

    fn host(&self) -> String {
        self.inner.host()
    }

    async fn close(&self) -> Result<()> {
        self.read_cache.invalidate_all();
        self.inner.close().await
    }
}
