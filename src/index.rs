//! Persistent cache index.
//!
//! Maps `(cache key, vary key)` to entry metadata: the URL, request and
//! response header snapshots, body size, and request/response/last-access
//! timestamps. Backed by SQLite, with a lazily-loaded in-memory view per
//! cache key. The index also owns the size accounting used for eviction:
//! entries are ranked by last access time and everything past the cumulative
//! size limit is deleted in one statement.

use crate::entry::codec::CACHE_VERSION;
use crate::error::CacheError;
use crate::freshness::{self, CacheKey, VaryKey};
use crate::headers::HeaderList;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::{Row, SqlitePool};

const METADATA_KEY: i64 = 12389;

/// Default cap on the total on-disk footprint.
pub const DEFAULT_MAXIMUM_CACHE_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vary_key: VaryKey,
    pub url: String,
    pub request_headers: HeaderList,
    pub response_headers: HeaderList,
    pub data_size: u64,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSizes {
    pub total: u64,
    pub since_requested_time: u64,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    maximum_cache_size: u64,
    maximum_entry_size: u64,
}

impl Limits {
    fn new(maximum_cache_size: u64) -> Self {
        Self {
            maximum_cache_size,
            maximum_entry_size: maximum_cache_size / 8,
        }
    }
}

pub struct CacheIndex {
    pool: SqlitePool,
    entries: DashMap<CacheKey, Vec<IndexEntry>>,
    limits: Mutex<Limits>,
}

fn timestamp_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_timestamp_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

impl CacheIndex {
    /// Opens (or initializes) the index over the given database. A stored
    /// format version different from [`CACHE_VERSION`] drops the index table;
    /// the on-disk entry files it described are unreadable anyway.
    pub async fn create(pool: SqlitePool, maximum_cache_size: u64) -> Result<Self, CacheError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS CacheMetadata (
                metadata_key INTEGER,
                version INTEGER,
                PRIMARY KEY(metadata_key)
            );",
        )
        .execute(&pool)
        .await?;

        let stored_version: Option<i64> =
            sqlx::query("SELECT version FROM CacheMetadata WHERE metadata_key = ?;")
                .bind(METADATA_KEY)
                .fetch_optional(&pool)
                .await?
                .map(|row| row.get(0));

        if stored_version != Some(CACHE_VERSION as i64) {
            if let Some(version) = stored_version {
                tracing::warn!(
                    stored = version,
                    current = CACHE_VERSION,
                    "cache index version mismatch, rebuilding"
                );
            }

            sqlx::query("DROP TABLE IF EXISTS CacheIndex;")
                .execute(&pool)
                .await?;
            sqlx::query("INSERT OR REPLACE INTO CacheMetadata VALUES (?, ?);")
                .bind(METADATA_KEY)
                .bind(CACHE_VERSION as i64)
                .execute(&pool)
                .await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS CacheIndex (
                cache_key INTEGER,
                vary_key INTEGER,
                url TEXT,
                request_headers TEXT,
                response_headers TEXT,
                data_size INTEGER,
                request_time INTEGER,
                response_time INTEGER,
                last_access_time INTEGER,
                PRIMARY KEY(cache_key, vary_key)
            );",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            entries: DashMap::new(),
            limits: Mutex::new(Limits::new(maximum_cache_size)),
        })
    }

    pub fn set_maximum_cache_size(&self, bytes: u64) {
        *self.limits.lock() = Limits::new(bytes);
    }

    /// Persists a freshly-written entry. Header snapshots are filtered
    /// through the storage exemption list first; oversized entries are
    /// rejected so one response cannot monopolize the cache.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_entry(
        &self,
        cache_key: CacheKey,
        vary_key: VaryKey,
        url: String,
        request_headers: &HeaderList,
        response_headers: &HeaderList,
        data_size: u64,
        request_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut stored_request_headers = HeaderList::new();
        freshness::store_header_fields(&mut stored_request_headers, request_headers);
        let mut stored_response_headers = HeaderList::new();
        freshness::store_header_fields(&mut stored_response_headers, response_headers);

        let serialized_request_headers = stored_request_headers.serialize();
        let serialized_response_headers = stored_response_headers.serialize();

        let maximum_entry_size = self.limits.lock().maximum_entry_size;
        let estimated_size = data_size
            + serialized_request_headers.len() as u64
            + serialized_response_headers.len() as u64;
        if estimated_size > maximum_entry_size {
            return Err(CacheError::EntryTooLarge);
        }

        let now = Utc::now();

        sqlx::query("INSERT OR REPLACE INTO CacheIndex VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);")
            .bind(cache_key.0 as i64)
            .bind(vary_key.0 as i64)
            .bind(&url)
            .bind(&serialized_request_headers)
            .bind(&serialized_response_headers)
            .bind(data_size as i64)
            .bind(timestamp_millis(request_time))
            .bind(timestamp_millis(response_time))
            .bind(timestamp_millis(now))
            .execute(&self.pool)
            .await?;

        let entry = IndexEntry {
            vary_key,
            url,
            request_headers: stored_request_headers,
            response_headers: stored_response_headers,
            data_size,
            request_time,
            response_time,
            last_access_time: now,
        };

        let mut entries = self.entries.entry(cache_key).or_default();
        entries.retain(|existing| existing.vary_key != vary_key);
        entries.push(entry);

        Ok(())
    }

    pub async fn remove_entry(
        &self,
        cache_key: CacheKey,
        vary_key: VaryKey,
    ) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM CacheIndex WHERE cache_key = ? AND vary_key = ?;")
            .bind(cache_key.0 as i64)
            .bind(vary_key.0 as i64)
            .execute(&self.pool)
            .await?;

        self.delete_in_memory(cache_key, vary_key);
        Ok(())
    }

    pub async fn update_response_headers(
        &self,
        cache_key: CacheKey,
        vary_key: VaryKey,
        response_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        sqlx::query(
            "UPDATE CacheIndex SET response_headers = ? WHERE cache_key = ? AND vary_key = ?;",
        )
        .bind(response_headers.serialize())
        .bind(cache_key.0 as i64)
        .bind(vary_key.0 as i64)
        .execute(&self.pool)
        .await?;

        if let Some(mut entries) = self.entries.get_mut(&cache_key) {
            if let Some(entry) = entries.iter_mut().find(|entry| entry.vary_key == vary_key) {
                entry.response_headers = response_headers.clone();
            }
        }

        Ok(())
    }

    pub async fn update_last_access_time(
        &self,
        cache_key: CacheKey,
        vary_key: VaryKey,
    ) -> Result<(), CacheError> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE CacheIndex SET last_access_time = ? WHERE cache_key = ? AND vary_key = ?;",
        )
        .bind(timestamp_millis(now))
        .bind(cache_key.0 as i64)
        .bind(vary_key.0 as i64)
        .execute(&self.pool)
        .await?;

        if let Some(mut entries) = self.entries.get_mut(&cache_key) {
            if let Some(entry) = entries.iter_mut().find(|entry| entry.vary_key == vary_key) {
                entry.last_access_time = now;
            }
        }

        Ok(())
    }

    /// Looks up the variant of `cache_key` matching the request's negotiated
    /// headers, loading the key's rows from the database on first touch.
    pub async fn find_entry(
        &self,
        cache_key: CacheKey,
        request_headers: &HeaderList,
    ) -> Result<Option<IndexEntry>, CacheError> {
        if !self.entries.contains_key(&cache_key) {
            let rows = sqlx::query(
                "SELECT vary_key, url, request_headers, response_headers, data_size,
                        request_time, response_time, last_access_time
                 FROM CacheIndex WHERE cache_key = ?;",
            )
            .bind(cache_key.0 as i64)
            .fetch_all(&self.pool)
            .await?;

            let loaded: Vec<IndexEntry> = rows
                .into_iter()
                .map(|row| IndexEntry {
                    vary_key: VaryKey(row.get::<i64, _>(0) as u64),
                    url: row.get(1),
                    request_headers: HeaderList::deserialize(&row.get::<String, _>(2)),
                    response_headers: HeaderList::deserialize(&row.get::<String, _>(3)),
                    data_size: row.get::<i64, _>(4) as u64,
                    request_time: from_timestamp_millis(row.get(5)),
                    response_time: from_timestamp_millis(row.get(6)),
                    last_access_time: from_timestamp_millis(row.get(7)),
                })
                .collect();

            self.entries.entry(cache_key).or_insert(loaded);
        }

        let entries = match self.entries.get(&cache_key) {
            Some(entries) => entries,
            None => return Ok(None),
        };

        Ok(entries
            .iter()
            .find(|entry| {
                freshness::create_vary_key(request_headers, &entry.response_headers)
                    == entry.vary_key
            })
            .cloned())
    }

    /// Deletes least-recently-used rows until the cumulative estimated size
    /// fits the configured limit, returning the evicted keys so the caller
    /// can delete the corresponding files.
    pub async fn remove_entries_exceeding_cache_limit(
        &self,
    ) -> Result<Vec<(CacheKey, VaryKey)>, CacheError> {
        let maximum_cache_size = self.limits.lock().maximum_cache_size;

        let rows = sqlx::query(
            "WITH RankedCacheIndex AS (
                SELECT
                    cache_key,
                    vary_key,
                    SUM(data_size + LENGTH(request_headers) + LENGTH(response_headers))
                        OVER (ORDER BY last_access_time DESC)
                        AS cumulative_estimated_size
                FROM CacheIndex
            )
            DELETE FROM CacheIndex
            WHERE (cache_key, vary_key) IN (
                SELECT cache_key, vary_key
                FROM RankedCacheIndex
                WHERE cumulative_estimated_size > ?
            )
            RETURNING cache_key, vary_key;",
        )
        .bind(maximum_cache_size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(self.collect_removed(rows))
    }

    /// Deletes every row last accessed at or after `since`, returning the
    /// removed keys.
    pub async fn remove_entries_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(CacheKey, VaryKey)>, CacheError> {
        let rows = sqlx::query(
            "DELETE FROM CacheIndex WHERE last_access_time >= ? RETURNING cache_key, vary_key;",
        )
        .bind(timestamp_millis(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(self.collect_removed(rows))
    }

    pub async fn estimate_cache_size_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<CacheSizes, CacheError> {
        let estimate = |since: DateTime<Utc>| {
            sqlx::query(
                "SELECT SUM(data_size + LENGTH(request_headers) + LENGTH(response_headers))
                 FROM CacheIndex WHERE last_access_time >= ?;",
            )
            .bind(timestamp_millis(since))
            .fetch_one(&self.pool)
        };

        let since_requested_time = estimate(since)
            .await?
            .get::<Option<i64>, _>(0)
            .unwrap_or(0) as u64;
        let total = estimate(DateTime::UNIX_EPOCH)
            .await?
            .get::<Option<i64>, _>(0)
            .unwrap_or(0) as u64;

        Ok(CacheSizes {
            total,
            since_requested_time,
        })
    }

    fn collect_removed(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<(CacheKey, VaryKey)> {
        let removed: Vec<(CacheKey, VaryKey)> = rows
            .into_iter()
            .map(|row| {
                (
                    CacheKey(row.get::<i64, _>(0) as u64),
                    VaryKey(row.get::<i64, _>(1) as u64),
                )
            })
            .collect();

        for &(cache_key, vary_key) in &removed {
            self.delete_in_memory(cache_key, vary_key);
        }

        removed
    }

    fn delete_in_memory(&self, cache_key: CacheKey, vary_key: VaryKey) {
        let mut remove_key = false;

        if let Some(mut entries) = self.entries.get_mut(&cache_key) {
            entries.retain(|entry| entry.vary_key != vary_key);
            remove_key = entries.is_empty();
        }

        if remove_key {
            self.entries.remove(&cache_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_index() -> CacheIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        CacheIndex::create(pool, DEFAULT_MAXIMUM_CACHE_SIZE)
            .await
            .unwrap()
    }

    fn response_headers() -> HeaderList {
        [("Cache-Control", "max-age=60")].into_iter().collect()
    }

    #[tokio::test]
    async fn create_and_find_entry() {
        let index = test_index().await;
        let key = CacheKey(1);
        let now = Utc::now();

        index
            .create_entry(
                key,
                VaryKey::NONE,
                "https://example.com/".into(),
                &HeaderList::new(),
                &response_headers(),
                5,
                now,
                now,
            )
            .await
            .unwrap();

        let found = index.find_entry(key, &HeaderList::new()).await.unwrap();
        let entry = found.expect("entry should be found");
        assert_eq!(entry.data_size, 5);
        assert_eq!(entry.url, "https://example.com/");

        assert!(index
            .find_entry(CacheKey(2), &HeaderList::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_entry_selects_matching_variant() {
        let index = test_index().await;
        let key = CacheKey(7);
        let now = Utc::now();

        let vary_response: HeaderList = [("Vary", "Accept-Encoding")].into_iter().collect();
        let gzip_request: HeaderList = [("Accept-Encoding", "gzip")].into_iter().collect();
        let br_request: HeaderList = [("Accept-Encoding", "br")].into_iter().collect();

        for request in [&gzip_request, &br_request] {
            let vary_key = freshness::create_vary_key(request, &vary_response);
            index
                .create_entry(
                    key,
                    vary_key,
                    "https://example.com/".into(),
                    request,
                    &vary_response,
                    1,
                    now,
                    now,
                )
                .await
                .unwrap();
        }

        let found = index.find_entry(key, &gzip_request).await.unwrap().unwrap();
        assert_eq!(
            found.vary_key,
            freshness::create_vary_key(&gzip_request, &vary_response)
        );

        assert!(index
            .find_entry(key, &HeaderList::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let index = test_index().await;
        index.set_maximum_cache_size(80);

        let result = index
            .create_entry(
                CacheKey(1),
                VaryKey::NONE,
                "https://example.com/".into(),
                &HeaderList::new(),
                &response_headers(),
                1000,
                Utc::now(),
                Utc::now(),
            )
            .await;

        assert!(matches!(result, Err(CacheError::EntryTooLarge)));
    }

    #[tokio::test]
    async fn eviction_removes_least_recently_used_first() {
        let index = test_index().await;
        let now = Utc::now();

        for i in 0..4u64 {
            index
                .create_entry(
                    CacheKey(i),
                    VaryKey::NONE,
                    format!("https://example.com/{i}"),
                    &HeaderList::new(),
                    &response_headers(),
                    1000,
                    now,
                    now,
                )
                .await
                .unwrap();
            // Distinct last-access ordering.
            index
                .update_last_access_time(CacheKey(i), VaryKey::NONE)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // Room for roughly two entries.
        index.set_maximum_cache_size(2200);
        let removed = index.remove_entries_exceeding_cache_limit().await.unwrap();

        let removed_keys: Vec<u64> = removed.iter().map(|(key, _)| key.0).collect();
        assert!(removed_keys.contains(&0));
        assert!(!removed_keys.contains(&3));

        for (cache_key, _) in removed {
            assert!(index
                .find_entry(cache_key, &HeaderList::new())
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn remove_entries_accessed_since_returns_keys() {
        let index = test_index().await;
        let now = Utc::now();

        index
            .create_entry(
                CacheKey(1),
                VaryKey::NONE,
                "https://example.com/".into(),
                &HeaderList::new(),
                &response_headers(),
                10,
                now,
                now,
            )
            .await
            .unwrap();

        let removed = index
            .remove_entries_accessed_since(DateTime::UNIX_EPOCH)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);

        let sizes = index
            .estimate_cache_size_accessed_since(DateTime::UNIX_EPOCH)
            .await
            .unwrap();
        assert_eq!(sizes.total, 0);
    }

    #[tokio::test]
    async fn estimate_counts_headers_and_body() {
        let index = test_index().await;
        let now = Utc::now();

        index
            .create_entry(
                CacheKey(1),
                VaryKey::NONE,
                "https://example.com/".into(),
                &HeaderList::new(),
                &response_headers(),
                100,
                now,
                now,
            )
            .await
            .unwrap();

        let sizes = index
            .estimate_cache_size_accessed_since(DateTime::UNIX_EPOCH)
            .await
            .unwrap();
        assert!(sizes.total > 100);
        assert_eq!(sizes.total, sizes.since_requested_time);
    }
}
