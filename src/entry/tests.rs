use super::codec::{
    hash_bytes, hash_pair, hash_u64, path_for_cache_entry, CacheFooter, CacheHeader, CACHE_MAGIC,
    CACHE_VERSION, FOOTER_LEN, HEADER_LEN,
};
use crate::error::CacheError;
use crate::freshness::{CacheKey, VaryKey};
use std::path::Path;

fn sample_header() -> CacheHeader {
    CacheHeader {
        magic: CACHE_MAGIC,
        version: CACHE_VERSION,
        key_hash: hash_u64(0xdead_beef_cafe_f00d),
        url_len: 23,
        url_hash: hash_bytes(b"https://example.com/a/b"),
        status_code: 200,
        reason_phrase_len: 2,
        reason_phrase_hash: hash_bytes(b"OK"),
    }
}

#[test]
fn header_round_trip() {
    let header = sample_header();
    let encoded = header.encode();

    assert_eq!(encoded.len(), HEADER_LEN);
    assert_eq!(CacheHeader::decode(&encoded).unwrap(), header);
}

#[test]
fn footer_round_trip() {
    let footer = CacheFooter {
        data_len: 1 << 40,
        header_hash: sample_header().hash(),
    };
    let encoded = footer.encode();

    assert_eq!(encoded.len(), FOOTER_LEN);
    assert_eq!(CacheFooter::decode(&encoded).unwrap(), footer);
}

#[test]
fn truncated_records_are_rejected() {
    let header = sample_header().encode();
    assert!(matches!(
        CacheHeader::decode(&header[..HEADER_LEN - 1]),
        Err(CacheError::Corrupt(_))
    ));

    let footer = CacheFooter::default().encode();
    assert!(matches!(
        CacheFooter::decode(&footer[..FOOTER_LEN - 1]),
        Err(CacheError::Corrupt(_))
    ));
}

#[test]
fn byte_hash_is_stable() {
    // Golden values; a change here invalidates every cache on disk.
    assert_eq!(hash_bytes(b""), 0);
    assert_eq!(hash_bytes(b"a"), hash_bytes(b"a"));
    assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    assert_ne!(hash_bytes(b"ab"), hash_bytes(b"ba"));
}

#[test]
fn pair_hash_is_order_sensitive() {
    assert_ne!(hash_pair(1, 2), hash_pair(2, 1));
    assert_eq!(hash_pair(1, 2), hash_pair(1, 2));
}

#[test]
fn header_hash_covers_every_field() {
    let base = sample_header();
    let mut tweaked = base;
    tweaked.status_code = 404;
    assert_ne!(base.hash(), tweaked.hash());

    let mut tweaked = base;
    tweaked.url_hash ^= 1;
    assert_ne!(base.hash(), tweaked.hash());
}

#[test]
fn entry_paths_are_distinct_per_variant() {
    let dir = Path::new("/tmp/cache");
    let a = path_for_cache_entry(dir, CacheKey(1), VaryKey::NONE);
    let b = path_for_cache_entry(dir, CacheKey(1), VaryKey(7));
    let c = path_for_cache_entry(dir, CacheKey(2), VaryKey::NONE);

    assert_eq!(a, dir.join("0000000000000001-0000000000000000"));
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
}
