use super::codec::{
    hash_bytes, hash_u64, path_for_cache_entry, CacheFooter, CacheHeader, CACHE_MAGIC,
    CACHE_VERSION, FOOTER_LEN, HEADER_LEN,
};
use super::remove_entry_artifacts;
use crate::cache::registry::Registration;
use crate::cache::DiskCache;
use crate::error::{CacheError, SendError};
use crate::freshness::{self, CacheKey, VaryKey};
use crate::headers::HeaderList;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

const SEND_CHUNK_SIZE: usize = 64 * 1024;

/// Whether a served entry still needs a conditional request behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RevalidationType {
    /// The entry may be used as-is.
    #[default]
    None,
    /// The entry may only be used once a conditional request confirms it.
    MustRevalidate,
    /// The entry is served stale now while a conditional request runs in
    /// the background.
    StaleWhileRevalidate,
}

/// Streams one stored response back out of the cache.
///
/// Opening validates the record's header against the cache key and the
/// stored url; the footer is validated once the whole body has been sent,
/// so a truncated or tampered record is caught before the transfer is
/// reported complete.
pub struct CacheEntryReader {
    cache: Arc<DiskCache>,
    registration: Option<Registration>,
    cache_key: CacheKey,
    vary_key: VaryKey,
    url: String,
    path: PathBuf,
    file: File,
    header: CacheHeader,
    reason_phrase: Option<String>,
    response_headers: HeaderList,
    data_offset: u64,
    data_size: u64,
    bytes_sent: u64,
    revalidation_type: RevalidationType,
}

impl CacheEntryReader {
    pub(crate) async fn open(
        cache: Arc<DiskCache>,
        cache_key: CacheKey,
        vary_key: VaryKey,
        response_headers: HeaderList,
        data_size: u64,
    ) -> Result<Self, CacheError> {
        let path = path_for_cache_entry(cache.cache_directory(), cache_key, vary_key);

        match Self::open_and_validate(&path, cache_key, data_size).await {
            Ok((file, header, url, reason_phrase, data_offset)) => Ok(Self {
                cache,
                registration: None,
                cache_key,
                vary_key,
                url,
                path,
                file,
                header,
                reason_phrase,
                response_headers,
                data_offset,
                data_size,
                bytes_sent: 0,
                revalidation_type: RevalidationType::None,
            }),
            Err(error) => {
                // The file is unusable; leave no trace of it behind.
                let _ = tokio::fs::remove_file(&path).await;
                Err(error)
            }
        }
    }

    async fn open_and_validate(
        path: &Path,
        cache_key: CacheKey,
        data_size: u64,
    ) -> Result<(File, CacheHeader, String, Option<String>, u64), CacheError> {
        let mut file = File::open(path).await?;

        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes).await?;
        let header = CacheHeader::decode(&header_bytes)?;

        if header.magic != CACHE_MAGIC {
            return Err(CacheError::Corrupt("bad magic"));
        }
        if header.version != CACHE_VERSION {
            return Err(CacheError::Corrupt("version mismatch"));
        }
        if header.key_hash != hash_u64(cache_key.0) {
            return Err(CacheError::Corrupt("cache key mismatch"));
        }

        let mut url_bytes = vec![0u8; header.url_len as usize];
        file.read_exact(&mut url_bytes).await?;
        if hash_bytes(&url_bytes) != header.url_hash {
            return Err(CacheError::Corrupt("url hash mismatch"));
        }
        let url =
            String::from_utf8(url_bytes).map_err(|_| CacheError::Corrupt("url is not utf-8"))?;

        let reason_phrase = if header.reason_phrase_len > 0 {
            let mut reason_bytes = vec![0u8; header.reason_phrase_len as usize];
            file.read_exact(&mut reason_bytes).await?;
            if hash_bytes(&reason_bytes) != header.reason_phrase_hash {
                return Err(CacheError::Corrupt("reason phrase hash mismatch"));
            }
            Some(
                String::from_utf8(reason_bytes)
                    .map_err(|_| CacheError::Corrupt("reason phrase is not utf-8"))?,
            )
        } else {
            None
        };

        let data_offset =
            (HEADER_LEN + header.url_len as usize + header.reason_phrase_len as usize) as u64;

        let expected_len = data_offset + data_size + FOOTER_LEN as u64;
        if file.metadata().await?.len() != expected_len {
            return Err(CacheError::Corrupt("unexpected file length"));
        }

        Ok((file, header, url, reason_phrase, data_offset))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status_code(&self) -> u32 {
        self.header.status_code
    }

    pub fn reason_phrase(&self) -> Option<&str> {
        self.reason_phrase.as_deref()
    }

    pub fn response_headers(&self) -> &HeaderList {
        &self.response_headers
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn revalidation_type(&self) -> RevalidationType {
        self.revalidation_type
    }

    pub(crate) fn set_revalidation_type(&mut self, revalidation_type: RevalidationType) {
        self.revalidation_type = revalidation_type;
    }

    pub(crate) fn attach_registration(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }

    fn marked_for_deletion(&self) -> bool {
        self.registration
            .as_ref()
            .is_some_and(Registration::marked_for_deletion)
    }

    fn close(&mut self) {
        if let Some(registration) = self.registration.as_mut() {
            registration.close();
        }
    }

    pub(crate) async fn remove(&mut self) {
        remove_entry_artifacts(&self.cache, Some(&self.path), self.cache_key, self.vary_key)
            .await;
        self.close();
    }

    /// Streams the stored body into `sink`, then validates the footer and
    /// bumps the entry's last access time. Consumes the reader; any failure
    /// deletes the entry and reports how far the transfer got.
    pub async fn send_to<W>(mut self, sink: &mut W) -> Result<u64, SendError>
    where
        W: AsyncWrite + Unpin,
    {
        match self.send_to_inner(sink).await {
            Ok(()) => {
                self.close();
                Ok(self.bytes_sent)
            }
            Err(error) => {
                tracing::debug!(url = %self.url, %error, "cache entry transfer failed");
                self.remove().await;
                Err(SendError {
                    bytes_sent: self.bytes_sent,
                    source: error,
                })
            }
        }
    }

    async fn send_to_inner<W>(&mut self, sink: &mut W) -> Result<(), CacheError>
    where
        W: AsyncWrite + Unpin,
    {
        self.file.seek(SeekFrom::Start(self.data_offset)).await?;

        let mut buffer = vec![0u8; SEND_CHUNK_SIZE];
        while self.bytes_sent < self.data_size {
            if self.marked_for_deletion() {
                return Err(CacheError::EntryDeleted);
            }

            let remaining = (self.data_size - self.bytes_sent).min(SEND_CHUNK_SIZE as u64);
            let chunk = &mut buffer[..remaining as usize];
            self.file.read_exact(chunk).await?;
            sink.write_all(chunk).await?;
            self.bytes_sent += remaining;
        }
        sink.flush().await?;

        self.read_and_validate_footer().await?;

        if self.marked_for_deletion() {
            return Err(CacheError::EntryDeleted);
        }

        self.cache
            .index()
            .update_last_access_time(self.cache_key, self.vary_key)
            .await?;

        tracing::trace!(url = %self.url, bytes = self.bytes_sent, "served response from cache");
        Ok(())
    }

    async fn read_and_validate_footer(&mut self) -> Result<(), CacheError> {
        let mut footer_bytes = [0u8; FOOTER_LEN];
        self.file.read_exact(&mut footer_bytes).await?;
        let footer = CacheFooter::decode(&footer_bytes)?;

        if footer.data_len != self.data_size {
            return Err(CacheError::Corrupt("body length mismatch"));
        }
        if footer.header_hash != self.header.hash() {
            return Err(CacheError::Corrupt("header hash mismatch"));
        }

        Ok(())
    }

    /// A conditional request came back 304: folds the fresh header fields
    /// into the stored ones and persists them. An entry that was blocking
    /// other requests on its revalidation releases them here.
    pub async fn revalidation_succeeded(
        &mut self,
        updated_headers: &HeaderList,
    ) -> Result<(), CacheError> {
        freshness::update_header_fields(&mut self.response_headers, updated_headers);

        self.cache
            .index()
            .update_response_headers(self.cache_key, self.vary_key, &self.response_headers)
            .await?;

        if self.revalidation_type == RevalidationType::MustRevalidate {
            self.close();
        }

        Ok(())
    }

    /// A conditional request came back with a full new response (or an
    /// error): the stored entry is obsolete. Deletes it and closes.
    pub async fn revalidation_failed(mut self) {
        self.remove().await;
    }
}
