use crate::headers::HeaderList;
use sha1::{Digest, Sha1};
use std::fmt;
use url::Url;

/// Identity of "what resource, by what method": the first eight bytes of
/// SHA-1(url, method). Independent of response variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub u64);

/// Identity of "which negotiated variant": a hash of the request header
/// values named by the response's `Vary` field. [`VaryKey::NONE`] when the
/// response does not vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaryKey(pub u64);

impl VaryKey {
    pub const NONE: VaryKey = VaryKey(0);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Display for VaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn digest_prefix(hasher: Sha1) -> u64 {
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}

/// Serializes a URL the way the cache stores it: everything except the
/// fragment.
pub fn url_for_cache_storage(url: &Url) -> String {
    if url.fragment().is_none() {
        return url.to_string();
    }

    let mut sanitized = url.clone();
    sanitized.set_fragment(None);
    sanitized.to_string()
}

pub fn create_cache_key(url: &str, method: &str) -> CacheKey {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    hasher.update(method.as_bytes());
    CacheKey(digest_prefix(hasher))
}

/// Derives the variant key for a (request, response) pair from the request
/// header values the response declares in `Vary`.
pub fn create_vary_key(request_headers: &HeaderList, response_headers: &HeaderList) -> VaryKey {
    let Some(vary) = response_headers.get("Vary") else {
        return VaryKey::NONE;
    };

    let mut hasher = Sha1::new();
    let mut varies = false;

    for name in vary.split(',') {
        let name = name.trim();
        if name.is_empty() || name == "*" {
            continue;
        }

        varies = true;
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b"\0");
        hasher.update(request_headers.get(name).unwrap_or_default().as_bytes());
        hasher.update(b"\0");
    }

    if !varies {
        return VaryKey::NONE;
    }

    VaryKey(digest_prefix(hasher))
}
