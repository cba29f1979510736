use crate::models::ShortUrl;
use crate::storage::{
    non_empty, parse_row_ids, with_timeout, DeletionQueue, DeletionSink, RelationalOptions,
    Storage, StorageError, StorageResult, UrlRow,
};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// PostgreSQL backend. Long URLs are unique across all users, so creating a
/// URL twice yields the first record together with `AlreadyExists`.
pub struct PostgresStorage {
    pool: Arc<PgPool>,
    timeout: Duration,
    deletions: DeletionQueue,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, options: RelationalOptions) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.timeout)
            .connect(database_url)
            .await?;
        let pool = Arc::new(pool);

        let deleter = PgDeleter {
            pool: Arc::clone(&pool),
            timeout: options.timeout,
        };
        let deletions = DeletionQueue::spawn(Arc::new(deleter), options.deletion);

        Ok(Self {
            pool,
            timeout: options.timeout,
            deletions,
        })
    }

    async fn insert_url(&self, mut url: ShortUrl) -> StorageResult<ShortUrl> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO urls (url, user_id, correlation_id)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT urls_url_key DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&url.long_url)
        .bind(non_empty(&url.user_id))
        .bind(non_empty(&url.correlation_id))
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(id) = inserted {
            url.id = id.to_string();
            url.is_deleted = false;
            tracing::debug!(id = %url.id, "stored short url");
            return Ok(url);
        }

        let existing = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT id, url, user_id, correlation_id, is_deleted
            FROM urls
            WHERE url = $1
            LIMIT 1
            "#,
        )
        .bind(&url.long_url)
        .fetch_one(self.pool.as_ref())
        .await?;
        let existing = ShortUrl::from(existing);
        tracing::debug!(id = %existing.id, "long url already shortened");

        Err(StorageError::already_exists(existing))
    }

    async fn insert_batch(&self, urls: Vec<ShortUrl>) -> StorageResult<Vec<ShortUrl>> {
        let mut tx = self.pool.begin().await?;

        let mut created = Vec::with_capacity(urls.len());
        for mut url in urls {
            let id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO urls (url, user_id, correlation_id)
                VALUES ($1, $2, $3)
                RETURNING id
                "#,
            )
            .bind(&url.long_url)
            .bind(non_empty(&url.user_id))
            .bind(non_empty(&url.correlation_id))
            .fetch_one(&mut *tx)
            .await?;
            url.id = id.to_string();
            url.is_deleted = false;
            created.push(url);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn select_by_id(&self, id: i64) -> StorageResult<ShortUrl> {
        sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT id, url, user_id, correlation_id, is_deleted
            FROM urls
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .map(ShortUrl::from)
        .ok_or(StorageError::NotFound)
    }

    async fn select_by_user(&self, user_id: &str) -> StorageResult<Vec<ShortUrl>> {
        let rows = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT id, url, user_id, correlation_id, is_deleted
            FROM urls
            WHERE user_id = $1 AND NOT is_deleted
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(ShortUrl::from).collect())
    }
}

struct PgDeleter {
    pool: Arc<PgPool>,
    timeout: Duration,
}

#[async_trait]
impl DeletionSink for PgDeleter {
    async fn soft_delete(&self, user_id: &str, ids: &[String]) -> StorageResult<u64> {
        let ids = parse_row_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        with_timeout(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                UPDATE urls
                SET is_deleted = TRUE
                WHERE user_id = $1 AND id = ANY($2) AND NOT is_deleted
                "#,
            )
            .bind(user_id)
            .bind(&ids[..])
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> StorageResult<()> {
        with_timeout(self.timeout, async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS urls (
                    id BIGSERIAL PRIMARY KEY,
                    url TEXT NOT NULL,
                    user_id TEXT,
                    correlation_id TEXT,
                    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    CONSTRAINT urls_url_key UNIQUE (url)
                )
                "#,
            )
            .execute(self.pool.as_ref())
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_user_id ON urls(user_id)")
                .execute(self.pool.as_ref())
                .await?;

            Ok(())
        })
        .await
    }

    async fn create(&self, url: ShortUrl) -> StorageResult<ShortUrl> {
        with_timeout(self.timeout, self.insert_url(url)).await
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<ShortUrl> {
        let Ok(id) = id.parse::<i64>() else {
            return Err(StorageError::NotFound);
        };
        with_timeout(self.timeout, self.select_by_id(id)).await
    }

    async fn find_by_user_id(&self, user_id: &str) -> StorageResult<Vec<ShortUrl>> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        with_timeout(self.timeout, self.select_by_user(user_id)).await
    }

    async fn create_batch(&self, urls: Vec<ShortUrl>) -> StorageResult<Vec<ShortUrl>> {
        with_timeout(self.timeout, self.insert_batch(urls)).await
    }

    async fn delete_batch(&self, user_id: &str, ids: Vec<String>) -> StorageResult<()> {
        self.deletions.enqueue(user_id, ids).await
    }

    async fn ping(&self) -> StorageResult<()> {
        with_timeout(self.timeout, async {
            sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
            Ok(())
        })
        .await
    }

    async fn shutdown(&self) {
        self.deletions.shutdown().await;
    }
}
