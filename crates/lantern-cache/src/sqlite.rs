use crate::cache::{CacheLookup, CacheTtl, ResolutionCache};
use crate::error::{CacheError, Result};
use crate::noop::NoopResolutionCache;
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// SQLite implementation of [`ResolutionCache`].
///
/// One row per external id. Expiry is enforced twice: lazily on read (an
/// expired row reads as a miss and is deleted) and in bulk through
/// [`ResolutionCache::sweep_expired`], which [`SqliteResolutionCache::connect`]
/// runs at startup using the `expires_at` index so growth stays bounded
/// without a full scan.
#[derive(Debug, Clone)]
pub struct SqliteResolutionCache {
    pool: SqlitePool,
    ttl: CacheTtl,
}

impl SqliteResolutionCache {
    /// Opens (or creates) the cache database at `path` and sweeps expired
    /// rows.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(path, CacheTtl::default()).await
    }

    pub async fn connect_with(path: impl AsRef<Path>, ttl: CacheTtl) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Initialization(e.to_string()))?;
        let cache = Self::with_pool(pool, ttl).await?;

        let swept = cache.sweep_expired().await?;
        if swept > 0 {
            debug!(swept, "evicted expired resolution cache rows on startup");
        }
        Ok(cache)
    }

    /// Builds the cache on an existing pool, creating the schema if needed.
    pub async fn with_pool(pool: SqlitePool, ttl: CacheTtl) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resolution_cache (
                external_id TEXT PRIMARY KEY,
                locator TEXT,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| CacheError::Initialization(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_resolution_cache_expires_at
            ON resolution_cache (expires_at)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| CacheError::Initialization(e.to_string()))?;

        Ok(Self { pool, ttl })
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_unix_seconds() -> i64 {
    Timestamp::now().as_second()
}

fn map_sqlx_error(err: sqlx::Error) -> CacheError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => CacheError::Timeout(message),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed | sqlx::Error::Io(_) => {
            CacheError::Unavailable(message)
        }
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => CacheError::InvalidData(message),
        _ => CacheError::Query(message),
    }
}

#[async_trait]
impl ResolutionCache for SqliteResolutionCache {
    async fn get(&self, id: &str) -> Result<CacheLookup> {
        let now = now_unix_seconds();

        let row = sqlx::query(
            r#"
            SELECT locator, expires_at
            FROM resolution_cache
            WHERE external_id = ?
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(CacheLookup::Miss);
        };

        let expires_at: i64 = row.try_get("expires_at").map_err(map_sqlx_error)?;
        if expires_at <= now {
            trace!(id = %id, "cache entry expired, evicting");
            // Guard on expires_at so a concurrent fresh overwrite survives.
            sqlx::query(
                r#"
                DELETE FROM resolution_cache
                WHERE external_id = ? AND expires_at <= ?
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            return Ok(CacheLookup::Miss);
        }

        let locator: Option<String> = row.try_get("locator").map_err(map_sqlx_error)?;
        trace!(id = %id, found = locator.is_some(), "resolution cache hit");
        Ok(CacheLookup::Hit(locator))
    }

    async fn put(&self, id: &str, locator: Option<&str>) -> Result<()> {
        let expires_at = self.ttl.expires_at(locator)?.as_second();

        sqlx::query(
            r#"
            INSERT INTO resolution_cache (external_id, locator, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (external_id)
            DO UPDATE SET locator = excluded.locator, expires_at = excluded.expires_at
            "#,
        )
        .bind(id)
        .bind(locator)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        trace!(id = %id, found = locator.is_some(), "cached resolution");
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM resolution_cache")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("resolution cache cleared");
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM resolution_cache
            WHERE expires_at <= ?
            "#,
        )
        .bind(now_unix_seconds())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// Opens the durable cache at `path`, degrading to [`NoopResolutionCache`]
/// when the store cannot be opened.
///
/// Resolution must keep working without memoization, so store
/// unavailability is logged rather than surfaced.
pub async fn connect_or_noop(path: impl AsRef<Path>) -> Arc<dyn ResolutionCache> {
    match SqliteResolutionCache::connect(&path).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(
                path = %path.as_ref().display(),
                error = %e,
                "durable cache unavailable, continuing without memoization"
            );
            Arc::new(NoopResolutionCache)
        }
    }
}
