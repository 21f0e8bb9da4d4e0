use super::*;
use crate::headers::HeaderList;
use chrono::{TimeDelta, Utc};
use url::Url;

fn headers(pairs: &[(&str, &str)]) -> HeaderList {
    pairs.iter().copied().collect()
}

fn http_date(at: chrono::DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[test]
fn cache_key_is_deterministic_and_method_sensitive() {
    let get = create_cache_key("https://example.com/x", "GET");
    let get_again = create_cache_key("https://example.com/x", "GET");
    let head = create_cache_key("https://example.com/x", "HEAD");
    let other = create_cache_key("https://example.com/y", "GET");

    assert_eq!(get, get_again);
    assert_ne!(get, head);
    assert_ne!(get, other);
}

#[test]
fn url_for_cache_storage_strips_fragment() {
    let url = Url::parse("https://example.com/page?q=1#section").unwrap();
    assert_eq!(url_for_cache_storage(&url), "https://example.com/page?q=1");

    let plain = Url::parse("https://example.com/page?q=1").unwrap();
    assert_eq!(url_for_cache_storage(&plain), "https://example.com/page?q=1");
}

#[test]
fn vary_key_absent_vary_is_sentinel() {
    let request = headers(&[("Accept-Encoding", "gzip")]);
    let response = headers(&[("Content-Type", "text/html")]);
    assert_eq!(create_vary_key(&request, &response), VaryKey::NONE);
}

#[test]
fn vary_key_distinguishes_negotiated_variants() {
    let response = headers(&[("Vary", "Accept-Encoding")]);

    let gzip = create_vary_key(&headers(&[("Accept-Encoding", "gzip")]), &response);
    let brotli = create_vary_key(&headers(&[("Accept-Encoding", "br")]), &response);
    let gzip_again = create_vary_key(&headers(&[("accept-encoding", "gzip")]), &response);

    assert_ne!(gzip, VaryKey::NONE);
    assert_ne!(gzip, brotli);
    assert_eq!(gzip, gzip_again);
}

#[test]
fn vary_key_missing_request_header_hashes_as_empty() {
    let response = headers(&[("Vary", "Accept-Language")]);

    let absent = create_vary_key(&HeaderList::new(), &response);
    let empty = create_vary_key(&headers(&[("Accept-Language", "")]), &response);
    assert_eq!(absent, empty);
}

#[test]
fn request_cacheability() {
    let plain = HeaderList::new();
    assert!(is_request_cacheable("GET", &plain));
    assert!(is_request_cacheable("HEAD", &plain));
    assert!(!is_request_cacheable("POST", &plain));
    assert!(!is_request_cacheable("PUT", &plain));

    let no_store = headers(&[("Cache-Control", "no-store")]);
    assert!(!is_request_cacheable("GET", &no_store));
}

#[test]
fn response_cacheability() {
    assert!(is_response_cacheable(200, &HeaderList::new()));
    assert!(is_response_cacheable(404, &HeaderList::new()));

    // Non-final and non-heuristic statuses need an explicit signal.
    assert!(!is_response_cacheable(100, &HeaderList::new()));
    assert!(!is_response_cacheable(500, &HeaderList::new()));
    assert!(is_response_cacheable(
        500,
        &headers(&[("Cache-Control", "max-age=60")])
    ));

    assert!(!is_response_cacheable(
        200,
        &headers(&[("Cache-Control", "no-store")])
    ));
    assert!(!is_response_cacheable(200, &headers(&[("Vary", "*")])));
}

#[test]
fn freshness_lifetime_prefers_max_age_over_expires() {
    let now = Utc::now();
    let response = headers(&[
        ("Cache-Control", "max-age=60"),
        ("Date", &http_date(now)),
        ("Expires", &http_date(now + TimeDelta::seconds(600))),
    ]);

    let lifetime = calculate_freshness_lifetime(200, &response, TimeDelta::zero());
    assert_eq!(lifetime, TimeDelta::seconds(60));
}

#[test]
fn freshness_lifetime_from_expires_minus_date() {
    let now = Utc::now();
    let response = headers(&[
        ("Date", &http_date(now)),
        ("Expires", &http_date(now + TimeDelta::seconds(300))),
    ]);

    let lifetime = calculate_freshness_lifetime(200, &response, TimeDelta::zero());
    assert_eq!(lifetime, TimeDelta::seconds(300));
}

#[test]
fn freshness_lifetime_heuristic_is_tenth_of_last_modified_age() {
    let now = Utc::now();
    let response = headers(&[("Last-Modified", &http_date(now - TimeDelta::seconds(1000)))]);

    let lifetime = calculate_freshness_lifetime(200, &response, TimeDelta::zero());
    assert!(lifetime >= TimeDelta::seconds(99) && lifetime <= TimeDelta::seconds(101));
}

#[test]
fn freshness_lifetime_defaults_to_zero() {
    let lifetime = calculate_freshness_lifetime(200, &HeaderList::new(), TimeDelta::zero());
    assert_eq!(lifetime, TimeDelta::zero());
}

#[test]
fn age_accounts_for_age_header_and_response_delay() {
    let now = Utc::now();
    let response = headers(&[("Age", "30"), ("Date", &http_date(now))]);

    let age = calculate_age(
        &response,
        now - TimeDelta::seconds(2),
        now,
        TimeDelta::zero(),
    );

    // corrected_age_value = 30s age + 2s delay; resident time is ~0.
    assert!(age >= TimeDelta::seconds(32));
    assert!(age < TimeDelta::seconds(34));
}

#[test]
fn lifetime_status_fresh_strictly_below_lifetime() {
    let request = HeaderList::new();
    let response = headers(&[("Cache-Control", "max-age=60")]);
    let lifetime = TimeDelta::seconds(60);

    assert_eq!(
        cache_lifetime_status(&request, &response, lifetime, TimeDelta::seconds(59)),
        CacheLifetimeStatus::Fresh
    );

    // Boundary at equality is stale.
    assert_eq!(
        cache_lifetime_status(&request, &response, lifetime, TimeDelta::seconds(60)),
        CacheLifetimeStatus::Expired
    );
    assert_eq!(
        cache_lifetime_status(&request, &response, lifetime, TimeDelta::seconds(120)),
        CacheLifetimeStatus::Expired
    );
}

#[test]
fn lifetime_status_must_revalidate_requires_validator() {
    let request = HeaderList::new();
    let with_validator = headers(&[
        ("Cache-Control", "max-age=0, must-revalidate"),
        ("ETag", "\"abc\""),
    ]);
    let without_validator = headers(&[("Cache-Control", "max-age=0, must-revalidate")]);

    assert_eq!(
        cache_lifetime_status(
            &request,
            &with_validator,
            TimeDelta::zero(),
            TimeDelta::zero()
        ),
        CacheLifetimeStatus::MustRevalidate
    );
    assert_eq!(
        cache_lifetime_status(
            &request,
            &without_validator,
            TimeDelta::zero(),
            TimeDelta::zero()
        ),
        CacheLifetimeStatus::Expired
    );
}

#[test]
fn lifetime_status_no_cache_forces_revalidation_even_when_fresh() {
    let request = HeaderList::new();
    let response = headers(&[
        ("Cache-Control", "no-cache, max-age=60"),
        ("ETag", "\"abc\""),
    ]);

    assert_eq!(
        cache_lifetime_status(
            &request,
            &response,
            TimeDelta::seconds(60),
            TimeDelta::zero()
        ),
        CacheLifetimeStatus::MustRevalidate
    );
}

#[test]
fn lifetime_status_request_no_cache_forces_revalidation() {
    let request = headers(&[("Cache-Control", "no-cache")]);
    let response = headers(&[("Cache-Control", "max-age=60"), ("ETag", "\"abc\"")]);

    assert_eq!(
        cache_lifetime_status(
            &request,
            &response,
            TimeDelta::seconds(60),
            TimeDelta::zero()
        ),
        CacheLifetimeStatus::MustRevalidate
    );
}

#[test]
fn lifetime_status_stale_while_revalidate_window() {
    let request = HeaderList::new();
    let response = headers(&[
        ("Cache-Control", "max-age=60, stale-while-revalidate=30"),
        ("ETag", "\"abc\""),
    ]);
    let lifetime = TimeDelta::seconds(60);

    assert_eq!(
        cache_lifetime_status(&request, &response, lifetime, TimeDelta::seconds(70)),
        CacheLifetimeStatus::StaleWhileRevalidate
    );

    // Past the window.
    assert_eq!(
        cache_lifetime_status(&request, &response, lifetime, TimeDelta::seconds(90)),
        CacheLifetimeStatus::Expired
    );
}

#[test]
fn parse_http_date_round_trip() {
    let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
    assert_eq!(http_date(parsed), "Sun, 06 Nov 1994 08:49:37 GMT");
    assert!(parse_http_date("not a date").is_none());
}

#[test]
fn update_header_fields_replaces_but_keeps_content_length() {
    let mut stored = headers(&[
        ("Content-Length", "100"),
        ("ETag", "\"old\""),
        ("X-Extra", "keep"),
    ]);
    let updated = headers(&[("Content-Length", "0"), ("ETag", "\"new\"")]);

    update_header_fields(&mut stored, &updated);

    assert_eq!(stored.get("Content-Length"), Some("100"));
    assert_eq!(stored.get("ETag"), Some("\"new\""));
    assert_eq!(stored.get("X-Extra"), Some("keep"));
}

#[test]
fn store_header_fields_drops_exempted() {
    let mut stored = HeaderList::new();
    let response = headers(&[
        ("Content-Type", "text/html"),
        ("Connection", "keep-alive"),
        ("Transfer-Encoding", "chunked"),
        (TEST_CACHE_ENABLED_HEADER, "1"),
    ]);

    store_header_fields(&mut stored, &response);

    assert_eq!(stored.len(), 1);
    assert_eq!(stored.get("Content-Type"), Some("text/html"));
}

#[test]
fn huge_header_seconds_saturate_instead_of_panicking() {
    let max = i64::MAX.to_string();

    let response = headers(&[("Cache-Control", &format!("max-age={max}"))]);
    let lifetime = calculate_freshness_lifetime(200, &response, TimeDelta::zero());
    assert_eq!(lifetime, TimeDelta::MAX);

    let now = Utc::now();
    let response = headers(&[("Age", max.as_str())]);
    assert_eq!(calculate_age(&response, now, now, TimeDelta::zero()), TimeDelta::MAX);

    // A saturated stale-while-revalidate window still classifies.
    let response = headers(&[
        ("Cache-Control", &format!("max-age=1, stale-while-revalidate={max}")),
        ("ETag", "\"v1\""),
    ]);
    let status = cache_lifetime_status(
        &HeaderList::new(),
        &response,
        TimeDelta::seconds(1),
        TimeDelta::seconds(100),
    );
    assert_eq!(status, CacheLifetimeStatus::StaleWhileRevalidate);

    let response = headers(&[("Cache-Control", &format!("max-age=-{max}"))]);
    assert_eq!(
        calculate_freshness_lifetime(200, &response, TimeDelta::zero()),
        TimeDelta::MIN
    );
}

#[test]
fn test_time_offset_is_bounded() {
    let offset = test_time_offset(&headers(&[(TEST_CACHE_TIME_OFFSET_HEADER, "3600")]));
    assert_eq!(offset, TimeDelta::seconds(3600));

    let huge = test_time_offset(&headers(&[(
        TEST_CACHE_TIME_OFFSET_HEADER,
        "9223372036854775807",
    )]));
    assert!(huge < TimeDelta::days(5000));
    // Must stay addable to a DateTime without overflow.
    let _ = Utc::now() + huge;
}
