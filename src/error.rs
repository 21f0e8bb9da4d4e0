use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] sqlx::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(&'static str),

    #[error("cache entry has been deleted")]
    EntryDeleted,

    #[error("response is not cacheable")]
    NotCacheable,

    #[error("response has already expired")]
    AlreadyExpired,

    #[error("cache entry size exceeds allowed maximum")]
    EntryTooLarge,
}

/// Error from a body transfer, carrying how many body bytes had already
/// reached the sink before the failure.
#[derive(Debug, Error)]
#[error("{source} (after {bytes_sent} bytes)")]
pub struct SendError {
    pub bytes_sent: u64,
    #[source]
    pub source: CacheError,
}
