use crate::error::CacheError;
use crate::freshness::{CacheKey, VaryKey};
use bytes::{Buf, BufMut, BytesMut};
use std::path::{Path, PathBuf};

pub const CACHE_MAGIC: u32 = u32::from_le_bytes(*b"hord");
pub const CACHE_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 32;
pub const FOOTER_LEN: usize = 12;

/// Stable one-at-a-time hash over a byte string. Part of the on-disk format;
/// must never change without bumping [`CACHE_VERSION`].
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash = 0u32;

    for &byte in bytes {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }

    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

fn hash_u32(mut key: u32) -> u32 {
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

/// Order-sensitive combination of two 32-bit hashes.
pub fn hash_pair(a: u32, b: u32) -> u32 {
    hash_u32(hash_u32(a).wrapping_mul(209) ^ hash_u32(b).wrapping_mul(413))
}

/// Folds a 64-bit key down to the 32-bit hash stored in [`CacheHeader`].
pub fn hash_u64(key: u64) -> u32 {
    hash_pair(key as u32, (key >> 32) as u32)
}

/// Deterministic file name for one stored variant. Distinct
/// (cache key, vary key) pairs never collide.
pub fn path_for_cache_entry(
    cache_directory: &Path,
    cache_key: CacheKey,
    vary_key: VaryKey,
) -> PathBuf {
    cache_directory.join(format!("{:016x}-{:016x}", cache_key.0, vary_key.0))
}

/// Fixed-size record written at the start of every entry file.
///
/// `key_hash` and the url fields are populated at writer creation; the
/// status fields are filled in once the response arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: u32,
    pub version: u32,
    pub key_hash: u32,
    pub url_len: u32,
    pub url_hash: u32,
    pub status_code: u32,
    pub reason_phrase_len: u32,
    pub reason_phrase_hash: u32,
}

impl CacheHeader {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.key_hash);
        buf.put_u32_le(self.url_len);
        buf.put_u32_le(self.url_hash);
        buf.put_u32_le(self.status_code);
        buf.put_u32_le(self.reason_phrase_len);
        buf.put_u32_le(self.reason_phrase_hash);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CacheError> {
        if data.len() < HEADER_LEN {
            return Err(CacheError::Corrupt("truncated header"));
        }

        let mut buf = data;
        Ok(Self {
            magic: buf.get_u32_le(),
            version: buf.get_u32_le(),
            key_hash: buf.get_u32_le(),
            url_len: buf.get_u32_le(),
            url_hash: buf.get_u32_le(),
            status_code: buf.get_u32_le(),
            reason_phrase_len: buf.get_u32_le(),
            reason_phrase_hash: buf.get_u32_le(),
        })
    }

    /// Order-sensitive hash over every field, stored in the footer so that a
    /// reader can detect a header that was tampered with after the fact.
    pub fn hash(&self) -> u32 {
        let mut hash = 0u32;
        hash = hash_pair(hash, self.magic);
        hash = hash_pair(hash, self.version);
        hash = hash_pair(hash, self.key_hash);
        hash = hash_pair(hash, self.url_len);
        hash = hash_pair(hash, self.url_hash);
        hash = hash_pair(hash, self.status_code);
        hash = hash_pair(hash, self.reason_phrase_len);
        hash = hash_pair(hash, self.reason_phrase_hash);
        hash
    }
}

/// Fixed-size record written after the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFooter {
    pub data_len: u64,
    pub header_hash: u32,
}

impl CacheFooter {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FOOTER_LEN);
        buf.put_u64_le(self.data_len);
        buf.put_u32_le(self.header_hash);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CacheError> {
        if data.len() < FOOTER_LEN {
            return Err(CacheError::Corrupt("truncated footer"));
        }

        let mut buf = data;
        Ok(Self {
            data_len: buf.get_u64_le(),
            header_hash: buf.get_u32_le(),
        })
    }
}
