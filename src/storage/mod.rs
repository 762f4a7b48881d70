pub mod cached;
pub mod context;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStore;
pub use context::OpContext;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use trait_def::{LinkStore, StorageError, StorageResult, StoreSettings, MAX_KEY_ATTEMPTS};

use crate::config::{Config, StorageBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Build the backend selected by configuration and run its migrations.
pub async fn open(config: &Config) -> Result<Arc<dyn LinkStore>> {
    let settings = StoreSettings::new(&config.base_url, config.key_length);
    let db = &config.storage;

    let store: Arc<dyn LinkStore> = match db.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Arc::new(MemoryStore::new(settings))
        }
        StorageBackend::File => {
            let path = db
                .file_path
                .as_deref()
                .context("file storage selected without a file path")?;
            tracing::info!("Using file storage: {}", path);
            Arc::new(FileStore::open(path, settings).await?)
        }
        StorageBackend::Sqlite => {
            let dsn = db.dsn.as_deref().context("sqlite storage selected without a DSN")?;
            tracing::info!("Using SQLite storage: {}", dsn);
            let inner = Arc::new(SqliteStore::new(dsn, db.max_connections, settings).await?);
            Arc::new(CachedStore::new(
                inner,
                db.cache_max_entries,
                Duration::from_secs(db.cache_ttl_secs),
            ))
        }
        StorageBackend::Postgres => {
            let dsn = db.dsn.as_deref().context("postgres storage selected without a DSN")?;
            tracing::info!("Using PostgreSQL storage");
            let inner = Arc::new(PostgresStore::new(dsn, db.max_connections, settings).await?);
            Arc::new(CachedStore::new(
                inner,
                db.cache_max_entries,
                Duration::from_secs(db.cache_ttl_secs),
            ))
        }
    };

    store.init().await.context("failed to initialize storage")?;
    Ok(store)
}
