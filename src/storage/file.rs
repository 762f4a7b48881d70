use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::{LinkStore, MemoryStore, OpContext, StorageResult, StoreSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory store that is loaded from and saved to a JSON file.
///
/// Nothing touches the file between [`FileStore::open`] and [`LinkStore::close`].
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    saved: AtomicBool,
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let links = load_links(&path).await?;
        tracing::info!(path = %path.display(), links = links.len(), "loaded file storage");

        Ok(Self {
            path,
            inner: MemoryStore::with_links(settings, links),
            saved: AtomicBool::new(false),
        })
    }

    /// Write every record to disk through a temporary file.
    pub async fn save(&self) -> Result<()> {
        let links = self.inner.snapshot();
        let json = serde_json::to_vec_pretty(&links)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), links = links.len(), "saved file storage");
        Ok(())
    }

    pub fn get_raw(&self, key: &str) -> Option<ShortLink> {
        self.inner.get_raw(key)
    }
}

async fn load_links(path: &Path) -> Result<Vec<ShortLink>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a valid link storage file", path.display()))
}

#[async_trait]
impl LinkStore for FileStore {
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
        self.inner.delete(ctx, keys, owner).await
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
        if self.saved.swap(true, Ordering::SeqCst) {
            tracing::debug!("file storage already saved, skipping");
            return Ok(());
        }
        self.save().await
    }
}
