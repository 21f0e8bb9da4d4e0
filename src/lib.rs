//! hoard - An HTTP disk cache
//!
//! Stores HTTP responses in per-variant files on disk, with an SQLite-backed
//! index for lookup and least-recently-used eviction, and RFC 9111 freshness
//! semantics deciding when a stored response may be served, must be
//! revalidated, or has expired.
//!
//! # Modules
//!
//! - [`cache`] - The [`DiskCache`] manager: entry lifecycle, per-key locking,
//!   wait queues, eviction and purge operations
//! - [`entry`] - On-disk record format plus the reader/writer pair
//! - [`freshness`] - Cache keys, storage policy, and the RFC 9111
//!   expiration model
//! - [`headers`] - Ordered, case-insensitive HTTP header lists
//! - [`index`] - SQLite index of stored entries
//! - [`error`] - Error types shared across the crate

pub mod cache;
pub mod entry;
pub mod error;
pub mod freshness;
pub mod headers;
pub mod index;

pub use cache::{
    CacheMode, CacheRequest, Config, CreateOutcome, DiskCache, Mode, OpenMode, OpenOutcome,
};
pub use entry::{CacheEntryReader, CacheEntryWriter, RevalidationType};
pub use error::{CacheError, SendError};
pub use freshness::{CacheKey, CacheLifetimeStatus, VaryKey};
pub use headers::{Header, HeaderList};
pub use index::{CacheIndex, CacheSizes, IndexEntry};
