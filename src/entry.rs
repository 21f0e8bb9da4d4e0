//! On-disk cache entries.
//!
//! Every stored response lives in one file laid out as
//! `[CacheHeader][url][reason phrase][body][CacheFooter]`. The header and
//! footer are fixed-width little-endian records defined in [`codec`]; the
//! footer carries the body length and a hash of the header so that a partial
//! write or later tampering is detected when the entry is read back.
//!
//! Entries come in two roles sharing the same identity:
//!
//! - [`CacheEntryWriter`] creates and populates a new record.
//! - [`CacheEntryReader`] opens, validates, and streams out an existing
//!   record.
//!
//! Both are handed out by [`DiskCache`](crate::cache::DiskCache), which
//! registers them in its open-entry table; closing an entry notifies the
//! manager exactly once, on every exit path, via its registration guard.

pub mod codec;
mod reader;
mod writer;

pub use reader::{CacheEntryReader, RevalidationType};
pub use writer::CacheEntryWriter;

use crate::cache::DiskCache;
use crate::freshness::{CacheKey, VaryKey};
use std::path::Path;

/// Deletes an entry's on-disk file and index row. Failures are logged and
/// swallowed; the entry is already considered gone.
pub(crate) async fn remove_entry_artifacts(
    cache: &DiskCache,
    path: Option<&Path>,
    cache_key: CacheKey,
    vary_key: VaryKey,
) {
    let Some(path) = path else {
        return;
    };

    if let Err(error) = tokio::fs::remove_file(path).await {
        tracing::trace!(%cache_key, %error, "failed to remove cache entry file");
    }

    if let Err(error) = cache.index().remove_entry(cache_key, vary_key).await {
        tracing::trace!(%cache_key, %error, "failed to remove cache index row");
    }
}

#[cfg(test)]
mod tests;
