use crate::keygen::KeyGenerator;
use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::{
    LinkStore, OpContext, StorageError, StorageResult, StoreSettings, MAX_KEY_ATTEMPTS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    settings: StoreSettings,
    keygen: KeyGenerator,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32, settings: StoreSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = if is_in_memory(database_url) {
            // Every connection to an in-memory database gets its own empty
            // database, so the pool must hold exactly one and never recycle it
            if max_connections != 1 {
                tracing::warn!(
                    max_connections,
                    "in-memory SQLite needs a single connection, ignoring pool size"
                );
            }
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };
        Ok(Self {
            pool: Arc::new(pool),
            keygen: KeyGenerator::new(settings.key_length),
            settings,
        })
    }

    /// Record for `key` regardless of its removed flag.
    pub async fn get_raw(&self, key: &str) -> Result<Option<ShortLink>> {
        let link = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT short_key, original_url, owner, is_deleted
            FROM urls
            WHERE short_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

async fn find_key(conn: &mut SqliteConnection, target: &str) -> StorageResult<Option<String>> {
    let key = sqlx::query_scalar::<_, String>("SELECT short_key FROM urls WHERE original_url = ?")
        .bind(target)
        .fetch_optional(conn)
        .await?;
    Ok(key)
}

/// Insert `target` under a fresh key, or report the key it already has.
///
/// Conflicts on either column are swallowed by the statement so a running
/// transaction is never aborted by a key collision.
async fn insert_or_find(
    conn: &mut SqliteConnection,
    keygen: &KeyGenerator,
    target: &str,
    owner: &str,
) -> StorageResult<Shortened> {
    for _ in 0..MAX_KEY_ATTEMPTS {
        let key = keygen.generate();
        let result = sqlx::query(
            r#"
            INSERT INTO urls (short_key, original_url, owner, is_deleted)
            VALUES (?, ?, ?, 0)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(target)
        .bind(owner)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Shortened::created(key));
        }

        if let Some(existing) = find_key(&mut *conn, target).await? {
            return Ok(Shortened::conflict(existing));
        }

        tracing::debug!(key = %key, "short key collision, drawing another");
    }

    Err(StorageError::KeyExhausted)
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                short_key TEXT PRIMARY KEY,
                original_url TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_owner ON urls(owner)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn create(&self, ctx: &OpContext, target: &str, owner: &str) -> StorageResult<Shortened> {
        ctx.check()?;
        let mut conn = self.pool.acquire().await?;
        insert_or_find(&mut conn, &self.keygen, target, owner).await
    }

    async fn get(&self, ctx: &OpContext, key: &str) -> StorageResult<String> {
        ctx.check()?;
        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT original_url, is_deleted FROM urls WHERE short_key = ?",
        )
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match row {
            Some((_, true)) => Err(StorageError::Gone),
            Some((target, false)) => Ok(target),
            None => Err(StorageError::NotFound),
        }
    }

    async fn find(&self, ctx: &OpContext, target: &str) -> StorageResult<String> {
        ctx.check()?;
        let mut conn = self.pool.acquire().await?;
        find_key(&mut conn, target).await?.ok_or(StorageError::NotFound)
    }

    async fn list_by_owner(&self, ctx: &OpContext, owner: &str) -> StorageResult<Vec<ShortLink>> {
        ctx.check()?;
        let links = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT short_key, original_url, owner, is_deleted
            FROM urls
            WHERE owner = ? AND is_deleted = 0
            "#,
        )
        .bind(owner)
        .fetch_all(self.pool.as_ref())
        .await?;

        if links.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(links)
    }

    async fn batch(
        &self,
        ctx: &OpContext,
        items: &[BatchItem],
        owner: &str,
    ) -> StorageResult<Vec<ResultItem>> {
        ctx.check()?;
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let shortened = insert_or_find(&mut tx, &self.keygen, &item.original_url, owner).await?;
            results.push(ResultItem {
                correlation_id: item.correlation_id.clone(),
                short_url: self.short_url(&shortened.key),
            });
        }

        tx.commit().await?;
        Ok(results)
    }

    async fn delete(&self, ctx: &OpContext, keys: &[String], owner: &str) -> StorageResult<()> {
        ctx.check()?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE urls SET is_deleted = 1 WHERE owner = ");
        query.push_bind(owner);
        query.push(" AND short_key IN (");
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push_bind(key);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(self.pool.as_ref()).await?;
        tracing::debug!(owner, requested = keys.len(), removed = result.rows_affected(), "soft-deleted links");
        Ok(())
    }

    async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>> {
        ctx.check()?;
        let owner = sqlx::query_scalar::<_, String>("SELECT owner FROM urls WHERE short_key = ?")
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(owner)
    }

    async fn ping(&self, ctx: &OpContext) -> StorageResult<()> {
        ctx.check()?;
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn host(&self) -> String {
        self.settings.host()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StoreSettings {
        StoreSettings::new("http://localhost:8080", 9)
    }

    fn item(id: &str, url: &str) -> BatchItem {
        BatchItem {
            correlation_id: id.to_string(),
            original_url: url.to_string(),
        }
    }

    async fn store(max_connections: u32) -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:", max_connections, settings())
            .await
            .unwrap();
        store.init().await.unwrap();
        store
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://links?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://links.db"));
    }

    #[tokio::test]
    async fn test_in_memory_database_ignores_larger_pool() {
        let store = store(5).await;
        let ctx = OpContext::new();

        // Concurrent callers must all see the schema created by init
        let mut handles = vec![];
        let store = Arc::new(store);
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create(&OpContext::new(), &format!("https://pool.example/{i}"), "u")
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().created);
        }
        assert_eq!(store.list_by_owner(&ctx, "u").await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_earlier_items() {
        let store = store(1).await;
        let ctx = OpContext::new();

        sqlx::query(
            r#"
            CREATE TRIGGER reject_blocked BEFORE INSERT ON urls
            WHEN NEW.original_url = 'https://blocked.example'
            BEGIN
                SELECT RAISE(ABORT, 'blocked target');
            END
            "#,
        )
        .execute(store.pool.as_ref())
        .await
        .unwrap();

        let items = vec![
            item("1", "https://first.example"),
            item("2", "https://blocked.example"),
            item("3", "https://third.example"),
        ];
        let result = store.batch(&ctx, &items, "batcher").await;

        assert!(matches!(result, Err(StorageError::Database(_))));
        assert!(matches!(
            store.find(&ctx, "https://first.example").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            store.list_by_owner(&ctx, "batcher").await,
            Err(StorageError::NotFound)
        ));

        // The pool is still usable after the rollback
        assert!(store.create(&ctx, "https://first.example", "batcher").await.unwrap().created);
    }

    #[tokio::test]
    async fn test_get_raw_keeps_removed_links() {
        let store = store(1).await;
        let ctx = OpContext::new();
        let key = store.create(&ctx, "https://a.example", "u").await.unwrap().key;
        store.delete(&ctx, &[key.clone()], "u").await.unwrap();

        let link = store.get_raw(&key).await.unwrap().unwrap();
        assert!(link.removed);
        assert_eq!(link.target, "https://a.example");
        assert!(matches!(store.get(&ctx, &key).await, Err(StorageError::Gone)));
    }
}
