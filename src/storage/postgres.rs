use crate::keygen::KeyGenerator;
use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::{
    LinkStore, OpContext, StorageError, StorageResult, StoreSettings, MAX_KEY_ATTEMPTS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStore {
    pool: Arc<PgPool>,
    settings: StoreSettings,
    keygen: KeyGenerator,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32, settings: StoreSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
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
            WHERE short_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }
}

async fn find_key(conn: &mut PgConnection, target: &str) -> StorageResult<Option<String>> {
    let key = sqlx::query_scalar::<_, String>("SELECT short_key FROM urls WHERE original_url = $1")
        .bind(target)
        .fetch_optional(conn)
        .await?;
    Ok(key)
}

/// `ON CONFLICT DO NOTHING` covers both the key and the target constraint, so
/// a key collision inside a batch transaction does not abort it.
async fn insert_or_find(
    conn: &mut PgConnection,
    keygen: &KeyGenerator,
    target: &str,
    owner: &str,
) -> StorageResult<Shortened> {
    for _ in 0..MAX_KEY_ATTEMPTS {
        let key = keygen.generate();
        let result = sqlx::query(
            r#"
            INSERT INTO urls (short_key, original_url, owner, is_deleted)
            VALUES ($1, $2, $3, FALSE)
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
impl LinkStore for PostgresStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                short_key TEXT PRIMARY KEY,
                original_url TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE
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
            "SELECT original_url, is_deleted FROM urls WHERE short_key = $1",
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
            WHERE owner = $1 AND NOT is_deleted
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

        let mut query =
            QueryBuilder::<Postgres>::new("UPDATE urls SET is_deleted = TRUE WHERE owner = ");
        query.push_bind(owner);
        query.push(" AND short_key = ANY(");
        query.push_bind(keys.to_vec());
        query.push(")");

        let result = query.build().execute(self.pool.as_ref()).await?;
        tracing::debug!(owner, requested = keys.len(), removed = result.rows_affected(), "soft-deleted links");
        Ok(())
    }

    async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>> {
        ctx.check()?;
        let owner = sqlx::query_scalar::<_, String>("SELECT owner FROM urls WHERE short_key = $1")
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
