//! HTTP cache freshness semantics (RFC 9111).
//!
//! Pure functions, no state and no I/O:
//!
//! - [`create_cache_key`] / [`create_vary_key`] - request identity hashes
//! - [`is_request_cacheable`] / [`is_response_cacheable`] - storage policy
//! - [`calculate_freshness_lifetime`] / [`calculate_age`] - expiration model
//! - [`cache_lifetime_status`] - the four-way serve/revalidate/expire
//!   classification driving the disk cache manager
//!
//! # Examples
//!
//! ```
//! use hoard::freshness::{self, CacheLifetimeStatus};
//! use hoard::headers::HeaderList;
//! use chrono::TimeDelta;
//!
//! let response: HeaderList = [("Cache-Control", "max-age=60")].into_iter().collect();
//! let request = HeaderList::new();
//!
//! let lifetime = freshness::calculate_freshness_lifetime(200, &response, TimeDelta::zero());
//! assert_eq!(lifetime, TimeDelta::seconds(60));
//!
//! let status = freshness::cache_lifetime_status(
//!     &request,
//!     &response,
//!     lifetime,
//!     TimeDelta::seconds(10),
//! );
//! assert_eq!(status, CacheLifetimeStatus::Fresh);
//! ```

mod keys;
mod lifetime;
mod policy;

pub use keys::{create_cache_key, create_vary_key, url_for_cache_storage, CacheKey, VaryKey};
pub use lifetime::{
    calculate_age, calculate_freshness_lifetime, cache_lifetime_status, parse_http_date,
    CacheLifetimeStatus,
};
pub use policy::{
    is_header_exempted_from_storage, is_request_cacheable, is_response_cacheable,
    store_header_fields, test_time_offset, update_header_fields, TEST_CACHE_ENABLED_HEADER,
    TEST_CACHE_TIME_OFFSET_HEADER,
};

#[cfg(test)]
mod tests;
