//! Disk cache manager.
//!
//! [`DiskCache`] owns the on-disk cache directory and the persistent index,
//! and orchestrates everything around the entries themselves: cacheability
//! policy, per-key locking between writers and readers, the wait queue for
//! requests blocked behind an in-flight entry, size-bound eviction, and the
//! cache's lifecycle modes.
//!
//! # Locking protocol
//!
//! For one cache key, at most one writer may be open, and a revalidating
//! reader excludes everything else. Plain readers may coexist. A request
//! that loses this race is parked on the key's wait queue and receives
//! [`CacheRequest::notify_request_unblocked`] once the key has no open
//! entries; the notification is dispatched from a separate task, never from
//! inside the close path that triggered it.
//!
//! # Modes
//!
//! - [`Mode::Normal`] - durable, user-visible cache.
//! - [`Mode::Partitioned`] - scratch directory per process instance, wiped
//!   at construction and removed entirely on drop.
//! - [`Mode::Testing`] - wiped at construction; entries are only created
//!   for requests carrying the test opt-in header, so unrelated fetches
//!   never pollute fixtures.

mod manager;
mod mode;
pub(crate) mod registry;

pub use manager::{CreateOutcome, DiskCache, OpenOutcome};
pub use mode::{CacheMode, Config, Mode, OpenMode};
pub use registry::CacheRequest;
