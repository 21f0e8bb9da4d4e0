use super::mode::{CacheMode, Config, Mode, OpenMode};
use super::registry::{CacheRequest, EntryKind, Registration, Registry};
use crate::entry::codec::path_for_cache_entry;
use crate::entry::{CacheEntryReader, CacheEntryWriter, RevalidationType};
use crate::error::CacheError;
use crate::freshness::{self, CacheKey, CacheLifetimeStatus, VaryKey};
use crate::headers::HeaderList;
use crate::index::{CacheIndex, CacheSizes};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Result of asking the cache for a writer.
pub enum CreateOutcome {
    Created(CacheEntryWriter),
    /// Another entry is open for this key; the request has been queued and
    /// will be notified when the key frees up.
    AlreadyOpen,
    /// Policy rejection; the fetch proceeds without caching.
    NotCacheable,
}

/// Result of asking the cache for a reader.
pub enum OpenOutcome {
    Opened(CacheEntryReader),
    /// Another entry is open for this key; the request has been queued and
    /// will be notified when the key frees up.
    AlreadyOpen,
    Miss,
}

pub struct DiskCache {
    config: Config,
    index: CacheIndex,
    registry: Registry,
}

impl DiskCache {
    pub async fn create(config: Config, pool: SqlitePool) -> Result<Arc<Self>, CacheError> {
        tokio::fs::create_dir_all(&config.cache_directory).await?;

        let index = CacheIndex::create(pool, config.maximum_cache_size).await?;
        let cache = Arc::new(Self {
            config,
            index,
            registry: Registry::default(),
        });

        // Non-durable modes start from a clean slate.
        if cache.config.mode != Mode::Normal {
            cache.wipe_all_entries().await?;
        }

        Ok(cache)
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn cache_directory(&self) -> &Path {
        &self.config.cache_directory
    }

    pub(crate) fn index(&self) -> &CacheIndex {
        &self.index
    }

    fn clock_offset(&self, request_headers: &HeaderList) -> TimeDelta {
        if self.config.mode == Mode::Testing {
            freshness::test_time_offset(request_headers)
        } else {
            TimeDelta::zero()
        }
    }

    /// Starts caching a response for a cache miss. At most one writer may
    /// exist per cache key; the conflict check and the registration are one
    /// atomic step.
    pub fn create_entry(
        self: &Arc<Self>,
        request: &Arc<dyn CacheRequest>,
        url: &str,
        method: &str,
        request_headers: &HeaderList,
        request_start_time: DateTime<Utc>,
    ) -> CreateOutcome {
        if self.config.mode == Mode::Testing
            && !request_headers.contains(freshness::TEST_CACHE_ENABLED_HEADER)
        {
            return CreateOutcome::NotCacheable;
        }

        if !freshness::is_request_cacheable(method, request_headers) {
            return CreateOutcome::NotCacheable;
        }

        let cache_key = freshness::create_cache_key(url, method);

        let Some((id, deletion_flag)) =
            self.registry
                .try_register(cache_key, EntryKind::Writer, request)
        else {
            tracing::debug!(%cache_key, url, "entry already open, queueing writer request");
            return CreateOutcome::AlreadyOpen;
        };

        let registration = Registration::new(self.clone(), cache_key, id, deletion_flag);
        let writer = CacheEntryWriter::create(
            self.clone(),
            registration,
            cache_key,
            url.to_string(),
            request_start_time,
            self.clock_offset(request_headers),
        );

        CreateOutcome::Created(writer)
    }

    /// Looks up a stored response and classifies it, returning a reader when
    /// the entry may be served (possibly marked for revalidation).
    pub async fn open_entry(
        self: &Arc<Self>,
        request: &Arc<dyn CacheRequest>,
        url: &str,
        method: &str,
        request_headers: &HeaderList,
        cache_mode: CacheMode,
        open_mode: OpenMode,
    ) -> Result<OpenOutcome, CacheError> {
        if matches!(cache_mode, CacheMode::Reload | CacheMode::NoStore) {
            return Ok(OpenOutcome::Miss);
        }

        if !freshness::is_request_cacheable(method, request_headers) {
            return Ok(OpenOutcome::Miss);
        }

        let cache_key = freshness::create_cache_key(url, method);
        let exclusive = open_mode == OpenMode::Revalidate || request.is_revalidation_request();
        let kind = EntryKind::Reader {
            revalidating: exclusive,
        };

        if self.registry.check_or_enqueue(cache_key, kind, request) {
            tracing::debug!(%cache_key, url, "entry already open, queueing reader request");
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let Some(found) = self.index.find_entry(cache_key, request_headers).await? else {
            return Ok(OpenOutcome::Miss);
        };

        let mut reader = match CacheEntryReader::open(
            self.clone(),
            cache_key,
            found.vary_key,
            found.response_headers.clone(),
            found.data_size,
        )
        .await
        {
            Ok(reader) => reader,
            Err(error) => {
                // Corruption is a permanent miss; drop the stale index row too.
                tracing::warn!(%cache_key, url, %error, "discarding unreadable cache entry");
                self.index.remove_entry(cache_key, found.vary_key).await?;
                return Ok(OpenOutcome::Miss);
            }
        };

        let clock_offset = self.clock_offset(request_headers);
        let freshness_lifetime = freshness::calculate_freshness_lifetime(
            reader.status_code(),
            &found.response_headers,
            clock_offset,
        );
        let current_age = freshness::calculate_age(
            &found.response_headers,
            found.request_time,
            found.response_time,
            clock_offset,
        );
        let status = freshness::cache_lifetime_status(
            request_headers,
            &found.response_headers,
            freshness_lifetime,
            current_age,
        );

        match status {
            CacheLifetimeStatus::Fresh => {
                if cache_mode == CacheMode::NoCache {
                    reader.set_revalidation_type(RevalidationType::MustRevalidate);
                } else if open_mode == OpenMode::Revalidate {
                    // Another reader already revalidated this entry; nothing
                    // left to do.
                    return Ok(OpenOutcome::Miss);
                }
            }
            CacheLifetimeStatus::Expired => {
                if !cache_mode.permits_stale_responses() {
                    reader.remove().await;
                    return Ok(OpenOutcome::Miss);
                }
            }
            CacheLifetimeStatus::MustRevalidate => {
                if !cache_mode.permits_stale_responses() {
                    reader.set_revalidation_type(RevalidationType::MustRevalidate);
                }
            }
            CacheLifetimeStatus::StaleWhileRevalidate => {
                if !cache_mode.permits_stale_responses() {
                    reader.set_revalidation_type(RevalidationType::StaleWhileRevalidate);
                }
            }
        }

        // A reader that must revalidate is exclusive; everything else keeps
        // the kind probed above.
        let final_kind = EntryKind::Reader {
            revalidating: exclusive
                || reader.revalidation_type() == RevalidationType::MustRevalidate,
        };

        // The probe above ran before the index lookup and file open; another
        // open may have registered in between, so the registration re-checks.
        let Some((id, deletion_flag)) = self.registry.try_register(cache_key, final_kind, request)
        else {
            tracing::debug!(%cache_key, url, "lost open race, queueing reader request");
            return Ok(OpenOutcome::AlreadyOpen);
        };

        reader.attach_registration(Registration::new(self.clone(), cache_key, id, deletion_flag));
        Ok(OpenOutcome::Opened(reader))
    }

    /// Notification that an entry has been closed (and destroyed). When the
    /// key has no open entries left, its queued requests are woken from a
    /// separate task so the wake-up never reenters the caller's I/O path.
    pub(crate) fn entry_closed(&self, cache_key: CacheKey, id: u64) {
        let waiters = self.registry.close(cache_key, id);
        if waiters.is_empty() {
            return;
        }

        tracing::trace!(%cache_key, waiters = waiters.len(), "waking requests blocked on cache key");

        let notify = move || {
            for waiter in waiters {
                if let Some(request) = waiter.upgrade() {
                    request.notify_request_unblocked();
                }
            }
        };

        // Entries can be dropped after the runtime is gone (e.g. during
        // shutdown); with no executor to defer to, notify inline.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { notify() });
            }
            Err(_) => notify(),
        }
    }

    /// Evicts least-recently-used entries until the cache fits its size
    /// limit. Open entries are flagged for deletion and self-delete on their
    /// next operation; their files are removed here.
    pub async fn remove_entries_exceeding_cache_limit(&self) -> Result<(), CacheError> {
        let removed = self.index.remove_entries_exceeding_cache_limit().await?;
        self.remove_entry_files(removed).await
    }

    /// Removes every entry last accessed at or after `since` (time-windowed
    /// purge, e.g. "clear browsing data from the last hour").
    pub async fn remove_entries_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let removed = self.index.remove_entries_accessed_since(since).await?;
        self.remove_entry_files(removed).await
    }

    pub fn set_maximum_disk_cache_size(&self, bytes: u64) {
        self.index.set_maximum_cache_size(bytes);
    }

    pub async fn estimate_cache_size_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<CacheSizes, CacheError> {
        self.index.estimate_cache_size_accessed_since(since).await
    }

    async fn remove_entry_files(
        &self,
        removed: Vec<(CacheKey, VaryKey)>,
    ) -> Result<(), CacheError> {
        for (cache_key, vary_key) in removed {
            self.registry.mark_for_deletion(cache_key);

            let path = path_for_cache_entry(&self.config.cache_directory, cache_key, vary_key);
            if let Err(error) = tokio::fs::remove_file(&path).await {
                tracing::trace!(%cache_key, %vary_key, %error, "failed to remove evicted entry file");
            }
        }

        Ok(())
    }

    async fn wipe_all_entries(&self) -> Result<(), CacheError> {
        self.index
            .remove_entries_accessed_since(DateTime::UNIX_EPOCH)
            .await?;

        // Remove leftover files the index no longer knows about (e.g. after
        // a version reset).
        let mut dir = tokio::fs::read_dir(&self.config.cache_directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        if self.config.mode == Mode::Partitioned {
            let _ = std::fs::remove_dir_all(&self.config.cache_directory);
        }
    }
}
