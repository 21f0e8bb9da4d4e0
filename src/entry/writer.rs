use super::codec::{path_for_cache_entry, CacheFooter, CacheHeader, CACHE_MAGIC, CACHE_VERSION};
use super::remove_entry_artifacts;
use crate::cache::registry::Registration;
use crate::cache::DiskCache;
use crate::error::CacheError;
use crate::freshness::{self, CacheKey, CacheLifetimeStatus, VaryKey};
use crate::headers::HeaderList;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Writes one response into a new on-disk cache record.
///
/// Created on a cache miss before the response exists; the file itself is
/// only created once `write_status_and_reason` has decided the response is
/// worth storing. Any I/O failure deletes the partial file and closes the
/// entry.
pub struct CacheEntryWriter {
    cache: Arc<DiskCache>,
    registration: Registration,
    cache_key: CacheKey,
    vary_key: VaryKey,
    url: String,
    path: Option<PathBuf>,
    header: CacheHeader,
    footer: CacheFooter,
    file: Option<BufWriter<File>>,
    request_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
    clock_offset: TimeDelta,
}

impl CacheEntryWriter {
    pub(crate) fn create(
        cache: Arc<DiskCache>,
        registration: Registration,
        cache_key: CacheKey,
        url: String,
        request_time: DateTime<Utc>,
        clock_offset: TimeDelta,
    ) -> Self {
        let header = CacheHeader {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
            key_hash: super::codec::hash_u64(cache_key.0),
            url_len: url.len() as u32,
            url_hash: super::codec::hash_bytes(url.as_bytes()),
            ..CacheHeader::default()
        };

        Self {
            cache,
            registration,
            cache_key,
            vary_key: VaryKey::NONE,
            url,
            path: None,
            header,
            footer: CacheFooter::default(),
            file: None,
            request_time,
            response_time: request_time,
            clock_offset,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn remove(&mut self) {
        remove_entry_artifacts(&self.cache, self.path.as_deref(), self.cache_key, self.vary_key)
            .await;
    }

    /// Records the response status line and creates the on-disk record.
    ///
    /// Aborts (removing any partial file and closing the entry) when the
    /// response is not cacheable, or when it is already expired with no way
    /// to revalidate it later. An already-stale response with a
    /// revalidation path (e.g. `max-age=0, must-revalidate` plus a
    /// validator) is still worth storing.
    pub async fn write_status_and_reason(
        &mut self,
        status_code: u32,
        reason_phrase: Option<&str>,
        request_headers: &HeaderList,
        response_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        if self.registration.marked_for_deletion() {
            self.registration.close();
            return Err(CacheError::EntryDeleted);
        }

        self.response_time = Utc::now() + self.clock_offset;
        self.header.status_code = status_code;

        if let Some(reason) = reason_phrase {
            self.header.reason_phrase_len = reason.len() as u32;
            self.header.reason_phrase_hash = super::codec::hash_bytes(reason.as_bytes());
        }

        let result = self
            .open_and_write_preamble(status_code, reason_phrase, request_headers, response_headers)
            .await;

        if let Err(error) = &result {
            tracing::debug!(url = %self.url, %error, "unable to start cache entry");
            self.remove().await;
            self.registration.close();
        }

        result
    }

    async fn open_and_write_preamble(
        &mut self,
        status_code: u32,
        reason_phrase: Option<&str>,
        request_headers: &HeaderList,
        response_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        if !freshness::is_response_cacheable(status_code, response_headers) {
            return Err(CacheError::NotCacheable);
        }

        self.vary_key = freshness::create_vary_key(request_headers, response_headers);
        let path =
            path_for_cache_entry(self.cache.cache_directory(), self.cache_key, self.vary_key);
        self.path = Some(path.clone());

        let freshness_lifetime = freshness::calculate_freshness_lifetime(
            status_code,
            response_headers,
            self.clock_offset,
        );
        let current_age = freshness::calculate_age(
            response_headers,
            self.request_time,
            self.response_time,
            self.clock_offset,
        );

        if freshness::cache_lifetime_status(
            request_headers,
            response_headers,
            freshness_lifetime,
            current_age,
        ) == CacheLifetimeStatus::Expired
        {
            return Err(CacheError::AlreadyExpired);
        }

        let mut file = BufWriter::new(File::create(&path).await?);
        file.write_all(&self.header.encode()).await?;
        file.write_all(self.url.as_bytes()).await?;
        if let Some(reason) = reason_phrase {
            file.write_all(reason.as_bytes()).await?;
        }

        self.file = Some(file);
        Ok(())
    }

    /// Appends body bytes. The running total becomes the footer's body
    /// length at flush time.
    pub async fn write_data(&mut self, data: &[u8]) -> Result<(), CacheError> {
        if self.registration.marked_for_deletion() {
            self.registration.close();
            return Err(CacheError::EntryDeleted);
        }

        let result = match self.file.as_mut() {
            Some(file) => file.write_all(data).await.map_err(CacheError::from),
            None => Err(CacheError::Io(std::io::Error::other(
                "cache entry file was never created",
            ))),
        };

        if let Err(error) = result {
            tracing::debug!(url = %self.url, %error, "unable to write data to cache entry");
            self.remove().await;
            self.registration.close();
            return Err(error);
        }

        self.footer.data_len += data.len() as u64;
        Ok(())
    }

    /// Finalizes the record: writes the footer, persists the index row, and
    /// triggers eviction. Consumes the writer; the entry is closed on every
    /// exit path, and any failure deletes the file.
    pub async fn flush(
        mut self,
        request_headers: &HeaderList,
        response_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        let result = self.flush_inner(request_headers, response_headers).await;

        if let Err(error) = &result {
            tracing::debug!(url = %self.url, %error, "unable to flush cache entry");
            self.remove().await;
        }

        self.registration.close();
        result
    }

    async fn flush_inner(
        &mut self,
        request_headers: &HeaderList,
        response_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        if self.registration.marked_for_deletion() {
            return Err(CacheError::EntryDeleted);
        }

        let file = self.file.as_mut().ok_or_else(|| {
            CacheError::Io(std::io::Error::other("cache entry file was never created"))
        })?;

        self.footer.header_hash = self.header.hash();
        file.write_all(&self.footer.encode()).await?;
        file.flush().await?;

        self.cache
            .index()
            .create_entry(
                self.cache_key,
                self.vary_key,
                self.url.clone(),
                request_headers,
                response_headers,
                self.footer.data_len,
                self.request_time,
                self.response_time,
            )
            .await?;

        if let Err(error) = self.cache.remove_entries_exceeding_cache_limit().await {
            tracing::warn!(%error, "eviction after flush failed");
        }

        tracing::debug!(url = %self.url, bytes = self.footer.data_len, "finished caching");
        Ok(())
    }

    /// Cancellation path: the request was aborted mid-fetch. Deletes any
    /// partial file and closes the entry.
    pub async fn remove_incomplete_entry(mut self) {
        self.remove().await;
        self.registration.close();
    }
}
