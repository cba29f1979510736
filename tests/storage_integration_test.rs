//! Integration tests for the relational storage backends
//!
//! Every scenario runs against SQLite (in memory) and, when `DATABASE_URL`
//! points at a PostgreSQL server, against PostgreSQL as well.
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested

use shortener::models::ShortUrl;
use shortener::storage::{
    PostgresStorage, RelationalOptions, SqliteStorage, Storage, StorageError,
};
use sqlx::{Connection, SqliteConnection};
use std::sync::Arc;
use std::time::Duration;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    // A single connection keeps the shared in-memory database free of lock contention.
    let options = RelationalOptions {
        max_connections: 1,
        ..RelationalOptions::default()
    };
    let storage = SqliteStorage::new("sqlite::memory:", options).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let storage = PostgresStorage::new(&db_url, RelationalOptions::default())
        .await
        .ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

/// URLs are unique per table, so every test works with its own.
fn unique_url(path: &str) -> String {
    format!("https://example.com/{}/{}", uuid::Uuid::new_v4(), path)
}

fn numeric_id(url: &ShortUrl) -> i64 {
    url.id.parse().expect("relational ids are integers")
}

async fn check_create_dedupes_by_long_url(storage: Arc<dyn Storage>) {
    let long_url = unique_url("dedupe");

    let first = storage
        .create(ShortUrl::new(&long_url).with_user("alice"))
        .await
        .unwrap();

    let err = storage
        .create(ShortUrl::new(&long_url).with_user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));

    let existing = err.existing().expect("conflict should carry the stored record");
    assert_eq!(existing.id, first.id);
    assert_eq!(existing.user_id, "alice");
}

async fn check_assigned_ids_increase(storage: Arc<dyn Storage>) {
    let first = storage.create(ShortUrl::new(unique_url("a"))).await.unwrap();
    let second = storage.create(ShortUrl::new(unique_url("b"))).await.unwrap();

    assert!(numeric_id(&second) > numeric_id(&first));

    let fetched = storage.get_by_id(&first.id).await.unwrap();
    assert_eq!(fetched.long_url, first.long_url);
    assert!(fetched.user_id.is_empty());
    assert!(!fetched.is_deleted);
}

async fn check_get_missing(storage: Arc<dyn Storage>) {
    assert!(matches!(
        storage.get_by_id("999999999").await,
        Err(StorageError::NotFound)
    ));
    assert!(matches!(
        storage.get_by_id("custom").await,
        Err(StorageError::NotFound)
    ));
}

async fn check_create_batch_commits_together(storage: Arc<dyn Storage>) {
    let batch = vec![
        ShortUrl {
            correlation_id: "x".to_string(),
            ..ShortUrl::new(unique_url("x")).with_user("alice")
        },
        ShortUrl {
            correlation_id: "y".to_string(),
            ..ShortUrl::new(unique_url("y")).with_user("alice")
        },
    ];
    let created = storage.create_batch(batch.clone()).await.unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(created[0].correlation_id, "x");
    assert_eq!(created[1].correlation_id, "y");
    assert!(numeric_id(&created[1]) > numeric_id(&created[0]));

    for (input, output) in batch.iter().zip(&created) {
        let stored = storage.get_by_id(&output.id).await.unwrap();
        assert_eq!(stored.long_url, input.long_url);
        assert_eq!(stored.correlation_id, input.correlation_id);
    }
}

async fn check_create_batch_rolls_back(storage: Arc<dyn Storage>) {
    let repeated = unique_url("repeated");
    let first = unique_url("first");
    let batch = vec![
        ShortUrl::new(&first),
        ShortUrl::new(&repeated),
        ShortUrl::new(&repeated),
    ];

    assert!(storage.create_batch(batch).await.is_err());

    // Nothing from the failed batch was kept, so these are fresh inserts.
    storage.create(ShortUrl::new(&first)).await.unwrap();
    storage.create(ShortUrl::new(&repeated)).await.unwrap();
}

async fn check_find_by_user_id(storage: Arc<dyn Storage>) {
    let alice = format!("alice-{}", uuid::Uuid::new_v4());
    let bob = format!("bob-{}", uuid::Uuid::new_v4());

    storage
        .create(ShortUrl::new(unique_url("a1")).with_user(&alice))
        .await
        .unwrap();
    storage
        .create(ShortUrl::new(unique_url("a2")).with_user(&alice))
        .await
        .unwrap();
    storage
        .create(ShortUrl::new(unique_url("b1")).with_user(&bob))
        .await
        .unwrap();

    let owned = storage.find_by_user_id(&alice).await.unwrap();
    assert_eq!(owned.len(), 2);
    assert!(owned.iter().all(|url| url.user_id == alice));

    assert!(storage.find_by_user_id("nobody").await.unwrap().is_empty());
    assert!(storage.find_by_user_id("").await.unwrap().is_empty());
}

async fn check_delete_batch_only_touches_owned_records(storage: Arc<dyn Storage>) {
    let alice = format!("alice-{}", uuid::Uuid::new_v4());
    let bob = format!("bob-{}", uuid::Uuid::new_v4());

    let owned = storage
        .create(ShortUrl::new(unique_url("owned")).with_user(&alice))
        .await
        .unwrap();
    let kept = storage
        .create(ShortUrl::new(unique_url("kept")).with_user(&alice))
        .await
        .unwrap();
    let foreign = storage
        .create(ShortUrl::new(unique_url("foreign")).with_user(&bob))
        .await
        .unwrap();

    storage
        .delete_batch(
            &alice,
            vec![owned.id.clone(), foreign.id.clone(), "not-a-number".to_string()],
        )
        .await
        .unwrap();

    // Waits for the background worker to apply everything queued so far.
    storage.shutdown().await;

    let deleted = storage.get_by_id(&owned.id).await.unwrap();
    assert!(deleted.is_deleted);
    assert_eq!(deleted.long_url, owned.long_url);

    assert!(!storage.get_by_id(&kept.id).await.unwrap().is_deleted);
    assert!(!storage.get_by_id(&foreign.id).await.unwrap().is_deleted);

    let remaining = storage.find_by_user_id(&alice).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept.id);

    // A deleted URL is still the record a duplicate create resolves to.
    let err = storage
        .create(ShortUrl::new(&owned.long_url).with_user(&alice))
        .await
        .unwrap_err();
    let existing = err.existing().unwrap();
    assert_eq!(existing.id, owned.id);
    assert!(existing.is_deleted);

    // The queue is closed once drained.
    assert!(matches!(
        storage.delete_batch(&alice, vec![kept.id.clone()]).await,
        Err(StorageError::Closed)
    ));
}

async fn check_concurrent_creates_share_one_id(storage: Arc<dyn Storage>) {
    let long_url = unique_url("concurrent");

    let mut handles = vec![];
    for i in 0..10 {
        let storage = Arc::clone(&storage);
        let long_url = long_url.clone();
        handles.push(tokio::spawn(async move {
            storage
                .create(ShortUrl::new(long_url).with_user(format!("user{}", i)))
                .await
        }));
    }

    let mut created_ids = vec![];
    let mut conflict_ids = vec![];
    for handle in handles {
        match handle.await.unwrap() {
            Ok(url) => created_ids.push(url.id),
            Err(e) => match e.existing() {
                Some(existing) => conflict_ids.push(existing.id.clone()),
                None => panic!("Unexpected error: {:?}", e),
            },
        }
    }

    assert_eq!(created_ids.len(), 1, "Exactly one creation should succeed");
    assert_eq!(conflict_ids.len(), 9, "All others should get the existing record");
    assert!(conflict_ids.iter().all(|id| *id == created_ids[0]));
}

macro_rules! relational_tests {
    ($($name:ident => $check:ident),* $(,)?) => {
        mod sqlite {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    if !should_test_backend("sqlite") {
                        return;
                    }
                    $check(create_sqlite_storage().await).await;
                }
            )*
        }

        mod postgres {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    if !should_test_backend("postgres") {
                        return;
                    }
                    let Some(storage) = create_postgres_storage().await else {
                        return;
                    };
                    $check(storage).await;
                }
            )*
        }
    };
}

relational_tests! {
    test_create_dedupes_by_long_url => check_create_dedupes_by_long_url,
    test_assigned_ids_increase => check_assigned_ids_increase,
    test_get_missing => check_get_missing,
    test_create_batch_commits_together => check_create_batch_commits_together,
    test_create_batch_rolls_back => check_create_batch_rolls_back,
    test_find_by_user_id => check_find_by_user_id,
    test_delete_batch_only_touches_owned_records => check_delete_batch_only_touches_owned_records,
    test_concurrent_creates_share_one_id => check_concurrent_creates_share_one_id,
}

#[tokio::test]
async fn test_ping_sqlite() {
    let storage = create_sqlite_storage().await;
    storage.ping().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_create_times_out_while_database_is_locked() {
    if !should_test_backend("sqlite") {
        return;
    }

    let dir = tempfile::TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("urls.db").display());
    let limit = Duration::from_millis(200);

    let storage = SqliteStorage::new(
        &url,
        RelationalOptions {
            timeout: limit,
            ..RelationalOptions::default()
        },
    )
    .await
    .unwrap();
    storage.init().await.unwrap();

    // A second connection holds the write lock for the rest of the test.
    let mut locker = SqliteConnection::connect(&url).await.unwrap();
    sqlx::query("BEGIN EXCLUSIVE")
        .execute(&mut locker)
        .await
        .unwrap();

    let result = storage.create(ShortUrl::new(unique_url("locked"))).await;
    match result {
        Err(StorageError::Timeout(elapsed)) => assert_eq!(elapsed, limit),
        other => panic!("expected a timeout, got {:?}", other),
    }

    sqlx::query("ROLLBACK").execute(&mut locker).await.unwrap();
}
