use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::OpContext;
use async_trait::async_trait;
use axum::http::Uri;
use thiserror::Error;

/// Attempts at drawing a fresh key before giving up on a create
pub const MAX_KEY_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short key not found")]
    NotFound,
    #[error("short key has been deleted")]
    Gone,
    #[error("operation cancelled before it started")]
    Cancelled,
    #[error("could not allocate a unique short key")]
    KeyExhausted,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Values every backend needs to mint keys and absolute URLs.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub base_url: String,
    pub key_length: usize,
}

impl StoreSettings {
    pub fn new(base_url: impl Into<String>, key_length: usize) -> Self {
        Self {
            base_url: base_url.into(),
            key_length,
        }
    }

    /// Authority part of the base URL, or the raw value if it does not parse.
    pub fn host(&self) -> String {
        self.base_url
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().map(|a| a.to_string()))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Shorten `target` for `owner`, or return the key it already has.
    async fn create(&self, ctx: &OpContext, target: &str, owner: &str) -> StorageResult<Shortened>;

    /// Resolve a key to its target. Removed keys report [`StorageError::Gone`].
    async fn get(&self, ctx: &OpContext, key: &str) -> StorageResult<String>;

    /// Reverse lookup of the key assigned to `target`.
    async fn find(&self, ctx: &OpContext, target: &str) -> StorageResult<String>;

    /// Non-removed links created by `owner`. [`StorageError::NotFound`] when empty.
    async fn list_by_owner(&self, ctx: &OpContext, owner: &str) -> StorageResult<Vec<ShortLink>>;

    /// Create every item or none of them.
    async fn batch(
        &self,
        ctx: &OpContext,
        items: &[BatchItem],
        owner: &str,
    ) -> StorageResult<Vec<ResultItem>>;

    /// Soft-delete the given keys that belong to `owner`, atomically.
    async fn delete(&self, ctx: &OpContext, keys: &[String], owner: &str) -> StorageResult<()>;

    /// Owner of `key` including removed links, `None` if the key is unknown.
    async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>>;

    async fn ping(&self, ctx: &OpContext) -> StorageResult<()>;

    /// Base authority used when building short URLs.
    fn host(&self) -> String;

    /// Release resources. File-backed stores persist here.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn short_url(&self, key: &str) -> String {
        format!("http://{}/{}", self.host(), key)
    }
}
