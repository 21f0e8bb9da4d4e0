use crate::index::DEFAULT_MAXIMUM_CACHE_SIZE;
use std::path::PathBuf;

/// Lifecycle mode of a [`DiskCache`](super::DiskCache) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Durable cache shared across runs.
    #[default]
    Normal,
    /// Per-instance scratch cache; wiped at construction, its directory is
    /// removed when the cache is dropped.
    Partitioned,
    /// Wiped at construction; only requests carrying
    /// [`TEST_CACHE_ENABLED_HEADER`](crate::freshness::TEST_CACHE_ENABLED_HEADER)
    /// may create entries.
    Testing,
}

/// The fetch's cache directive, as understood by `open_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Bypass the cache entirely.
    NoStore,
    /// Ignore any stored response; always refetch.
    Reload,
    /// A stored response must be revalidated before use, even when fresh.
    NoCache,
    /// Prefer the cache, stale or not.
    ForceCache,
    /// Only ever answer from the cache, stale or not.
    OnlyIfCached,
}

impl CacheMode {
    /// Whether this mode explicitly permits serving stale responses.
    pub fn permits_stale_responses(self) -> bool {
        matches!(self, CacheMode::ForceCache | CacheMode::OnlyIfCached)
    }
}

/// What an `open_entry` caller intends to do with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Revalidate,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub cache_directory: PathBuf,
    pub maximum_cache_size: u64,
}

impl Config {
    pub fn new(cache_directory: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Normal,
            cache_directory: cache_directory.into(),
            maximum_cache_size: DEFAULT_MAXIMUM_CACHE_SIZE,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_maximum_cache_size(mut self, bytes: u64) -> Self {
        self.maximum_cache_size = bytes;
        self
    }
}
