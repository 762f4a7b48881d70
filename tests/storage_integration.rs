//! Conformance tests shared by every link store backend
//!
//! Every backend must show the same uniqueness, ownership and soft-delete
//! behaviour. Backends can be filtered with the DATABASE_BACKEND environment
//! variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, every backend is tested. PostgreSQL additionally needs
//!   DATABASE_URL to point at a reachable server.

use linkcut::bulk::BulkEngine;
use linkcut::keygen::KeyGenerator;
use linkcut::models::BatchItem;
use linkcut::storage::{
    CachedStore, FileStore, LinkStore, MemoryStore, OpContext, PostgresStore, SqliteStore,
    StorageError, StoreSettings,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

fn settings() -> StoreSettings {
    StoreSettings::new("http://host", 9)
}

/// Unique suffix so repeated runs against a shared database do not collide
fn unique() -> String {
    KeyGenerator::new(12).generate()
}

fn item(correlation_id: &str, original_url: &str) -> BatchItem {
    BatchItem {
        correlation_id: correlation_id.to_string(),
        original_url: original_url.to_string(),
    }
}

async fn create_sqlite_store() -> Arc<dyn LinkStore> {
    // A single connection keeps every query on the same in-memory database
    let store = SqliteStore::new("sqlite::memory:", 1, settings()).await.unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}

async fn create_postgres_store() -> Option<Arc<dyn LinkStore>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let store = PostgresStore::new(&db_url, 5, settings()).await.ok()?;
    store.init().await.ok()?;
    Some(Arc::new(store))
}

async fn create_file_store(dir: &TempDir) -> Arc<dyn LinkStore> {
    Arc::new(
        FileStore::open(dir.path().join("links.json"), settings())
            .await
            .unwrap(),
    )
}

async fn check_round_trip_and_conflict(store: Arc<dyn LinkStore>) {
    let ctx = OpContext::new();
    let target = format!("https://example.com/{}", unique());

    let first = store.create(&ctx, &target, "alice").await.unwrap();
    assert!(first.created);
    assert_eq!(first.key.len(), 9);
    assert_eq!(store.get(&ctx, &first.key).await.unwrap(), target);
    assert_eq!(store.find(&ctx, &target).await.unwrap(), first.key);

    // Dedupe is global: another owner gets the same key back
    let second = store.create(&ctx, &target, "bob").await.unwrap();
    assert!(!second.created);
    assert_eq!(second.key, first.key);
    assert_eq!(store.owner_of(&ctx, &first.key).await.unwrap().as_deref(), Some("alice"));

    assert!(matches!(
        store.get(&ctx, "zzzzzzzzz").await,
        Err(StorageError::NotFound)
    ));
    assert!(matches!(
        store.find(&ctx, "https://never.example/missing").await,
        Err(StorageError::NotFound)
    ));
    assert_eq!(store.owner_of(&ctx, "zzzzzzzzz").await.unwrap(), None);
}

async fn check_ownership_and_soft_delete(store: Arc<dyn LinkStore>) {
    let ctx = OpContext::new();
    let owner = format!("owner-{}", unique());
    let other = format!("other-{}", unique());

    let mine = store
        .create(&ctx, &format!("https://mine.example/{}", unique()), &owner)
        .await
        .unwrap();
    let theirs = store
        .create(&ctx, &format!("https://theirs.example/{}", unique()), &other)
        .await
        .unwrap();

    let listed = store.list_by_owner(&ctx, &owner).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, mine.key);
    assert_eq!(listed[0].owner, owner);

    store
        .delete(&ctx, &[mine.key.clone(), theirs.key.clone()], &owner)
        .await
        .unwrap();

    assert!(matches!(store.get(&ctx, &mine.key).await, Err(StorageError::Gone)));
    assert!(store.get(&ctx, &theirs.key).await.is_ok());
    assert!(matches!(
        store.list_by_owner(&ctx, &owner).await,
        Err(StorageError::NotFound)
    ));
    assert_eq!(store.list_by_owner(&ctx, &other).await.unwrap().len(), 1);
}

async fn check_batch(store: Arc<dyn LinkStore>) {
    let ctx = OpContext::new();
    let owner = format!("batch-{}", unique());
    let existing = format!("https://existing.example/{}", unique());
    let fresh = format!("https://fresh.example/{}", unique());

    let prior = store.create(&ctx, &existing, "someone").await.unwrap();

    let items = vec![
        item("a", &fresh),
        item("b", &existing),
        item("c", &fresh),
    ];
    let results = store.batch(&ctx, &items, &owner).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].correlation_id, "a");
    assert_eq!(results[1].short_url, format!("http://host/{}", prior.key));
    assert_eq!(results[0].short_url, results[2].short_url);

    // Only the fresh target belongs to the batch owner
    assert_eq!(store.list_by_owner(&ctx, &owner).await.unwrap().len(), 1);
}

async fn check_concurrent_creates(store: Arc<dyn LinkStore>) {
    let run = unique();
    let mut handles = vec![];
    for i in 0..40 {
        let store = Arc::clone(&store);
        let target = format!("https://concurrent.example/{run}/{i}");
        handles.push(tokio::spawn(async move {
            store.create(&OpContext::new(), &target, "load").await
        }));
    }

    let mut keys = HashSet::new();
    for handle in handles {
        let shortened = handle.await.unwrap().unwrap();
        assert!(shortened.created);
        keys.insert(shortened.key);
    }
    assert_eq!(keys.len(), 40);
}

async fn check_bulk_delete(store: Arc<dyn LinkStore>) {
    let ctx = OpContext::new();
    let owner = format!("bulk-{}", unique());
    let mut keys = vec![];
    for i in 0..5 {
        let shortened = store
            .create(&ctx, &format!("https://bulk.example/{}/{i}", unique()), &owner)
            .await
            .unwrap();
        keys.push(shortened.key);
    }
    keys.push("unknown00".to_string());

    let engine = BulkEngine::new(Arc::clone(&store));
    let report = engine.delete(&ctx, keys.clone(), &owner).await.unwrap();
    assert_eq!(report.requested, 6);
    assert_eq!(report.deleted.len(), 5);
    assert_eq!(report.skipped, vec!["unknown00".to_string()]);

    for key in &keys[..5] {
        assert!(matches!(store.get(&ctx, key).await, Err(StorageError::Gone)));
    }
}

async fn check_cancelled_context(store: Arc<dyn LinkStore>) {
    let ctx = OpContext::new();
    ctx.cancel();
    let target = format!("https://cancelled.example/{}", unique());

    assert!(matches!(
        store.create(&ctx, &target, "alice").await,
        Err(StorageError::Cancelled)
    ));
    assert!(matches!(
        store.find(&OpContext::new(), &target).await,
        Err(StorageError::NotFound)
    ));
}

async fn check_all(store: Arc<dyn LinkStore>) {
    check_round_trip_and_conflict(Arc::clone(&store)).await;
    check_ownership_and_soft_delete(Arc::clone(&store)).await;
    check_batch(Arc::clone(&store)).await;
    check_concurrent_creates(Arc::clone(&store)).await;
    check_bulk_delete(Arc::clone(&store)).await;
    check_cancelled_context(Arc::clone(&store)).await;
    store.ping(&OpContext::new()).await.unwrap();
}

#[tokio::test]
async fn test_memory_store_conformance() {
    if !should_test_backend("memory") {
        return;
    }
    check_all(Arc::new(MemoryStore::new(settings()))).await;
}

#[tokio::test]
async fn test_file_store_conformance() {
    if !should_test_backend("file") {
        return;
    }
    let dir = TempDir::new().unwrap();
    check_all(create_file_store(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_store_conformance() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_all(create_sqlite_store().await).await;
}

#[tokio::test]
async fn test_cached_sqlite_store_conformance() {
    if !should_test_backend("sqlite") {
        return;
    }
    let inner = create_sqlite_store().await;
    check_all(Arc::new(CachedStore::new(inner, 1000, Duration::from_secs(60)))).await;
}

#[tokio::test]
async fn test_postgres_store_conformance() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(store) = create_postgres_store().await else {
        eprintln!("Skipping PostgreSQL conformance test: DATABASE_URL not set");
        return;
    };
    check_all(store).await;
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    if !should_test_backend("file") {
        return;
    }
    let dir = TempDir::new().unwrap();
    let ctx = OpContext::new();

    let store = create_file_store(&dir).await;
    let kept = store.create(&ctx, "https://kept.example", "alice").await.unwrap();
    let removed = store.create(&ctx, "https://removed.example", "alice").await.unwrap();
    store.delete(&ctx, &[removed.key.clone()], "alice").await.unwrap();
    store.close().await.unwrap();

    let reopened = create_file_store(&dir).await;
    assert_eq!(reopened.get(&ctx, &kept.key).await.unwrap(), "https://kept.example");
    assert!(matches!(reopened.get(&ctx, &removed.key).await, Err(StorageError::Gone)));

    // Removed keys keep their target reserved
    let again = reopened.create(&ctx, "https://removed.example", "bob").await.unwrap();
    assert!(!again.created);
    assert_eq!(again.key, removed.key);
}
