use crate::headers::HeaderList;
use chrono::TimeDelta;

/// Request header that opts a fetch into cache storage under
/// [`Mode::Testing`](crate::cache::Mode::Testing).
pub const TEST_CACHE_ENABLED_HEADER: &str = "x-cache-test-enabled";

/// Request header carrying a wall-clock offset (in seconds) applied to all
/// freshness arithmetic under testing mode.
pub const TEST_CACHE_TIME_OFFSET_HEADER: &str = "x-cache-test-time-offset";

pub(crate) fn directives(cache_control: &str) -> impl Iterator<Item = &str> {
    cache_control.split(',').map(str::trim)
}

pub(crate) fn has_directive(headers: &HeaderList, name: &str) -> bool {
    let Some(cache_control) = headers.get("Cache-Control") else {
        return false;
    };

    directives(cache_control).any(|directive| {
        let directive = directive.split('=').next().unwrap_or(directive).trim();
        directive.eq_ignore_ascii_case(name)
    })
}

pub(crate) fn directive_value<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    let cache_control = headers.get("Cache-Control")?;

    directives(cache_control).find_map(|directive| {
        let (directive_name, value) = directive.split_once('=')?;
        directive_name
            .trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Whether a request is one the cache may store a response for at all.
pub fn is_request_cacheable(method: &str, request_headers: &HeaderList) -> bool {
    if !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD") {
        return false;
    }

    !has_directive(request_headers, "no-store")
}

// https://httpwg.org/specs/rfc9111.html#response.cacheability
fn is_heuristically_cacheable_status(status_code: u32) -> bool {
    matches!(
        status_code,
        200 | 203 | 204 | 206 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501
    )
}

/// Whether a response may be stored by this (private) cache.
///
/// Requires a final status code, no `no-store` directive, no `Vary: *`
/// (such a response can never be matched), and either an explicit freshness
/// signal (`public`, `private`, `Expires`, `max-age`) or a heuristically
/// cacheable status code.
pub fn is_response_cacheable(status_code: u32, response_headers: &HeaderList) -> bool {
    if status_code < 200 {
        return false;
    }

    if has_directive(response_headers, "no-store") {
        return false;
    }

    if let Some(vary) = response_headers.get("Vary") {
        if vary.split(',').any(|name| name.trim() == "*") {
            return false;
        }
    }

    has_directive(response_headers, "public")
        || has_directive(response_headers, "private")
        || has_directive(response_headers, "max-age")
        || response_headers.contains("Expires")
        || is_heuristically_cacheable_status(status_code)
}

// https://httpwg.org/specs/rfc9111.html#storing.fields
pub fn is_header_exempted_from_storage(name: &str) -> bool {
    const EXEMPTED: &[&str] = &[
        // Hop-by-hop fields, removed before forwarding and hence before storage.
        "Connection",
        "Keep-Alive",
        "Proxy-Connection",
        "TE",
        "Transfer-Encoding",
        "Upgrade",
        // Proxy-specific fields that must not be stored.
        "Proxy-Authenticate",
        "Proxy-Authentication-Info",
        "Proxy-Authorization",
        // Cache test plumbing, never part of a stored response.
        TEST_CACHE_ENABLED_HEADER,
        TEST_CACHE_TIME_OFFSET_HEADER,
    ];

    EXEMPTED
        .iter()
        .any(|exempted| exempted.eq_ignore_ascii_case(name))
}

/// Copies storable header fields into the snapshot that goes to the index.
pub fn store_header_fields(stored_headers: &mut HeaderList, response_headers: &HeaderList) {
    for header in response_headers.iter() {
        if !is_header_exempted_from_storage(&header.name) {
            stored_headers.append(header.name.clone(), header.value.clone());
        }
    }
}

// https://httpwg.org/specs/rfc9111.html#update
//
// Each updated field replaces all stored values of that field; fields
// exempted from storage and Content-Length are never updated.
pub fn update_header_fields(stored_headers: &mut HeaderList, updated_headers: &HeaderList) {
    let is_exempted_from_update = |name: &str| {
        is_header_exempted_from_storage(name) || name.eq_ignore_ascii_case("Content-Length")
    };

    for updated in updated_headers.iter() {
        if !is_exempted_from_update(&updated.name) {
            stored_headers.remove_all(&updated.name);
        }
    }

    for updated in updated_headers.iter() {
        if !is_exempted_from_update(&updated.name) {
            stored_headers.append(updated.name.clone(), updated.value.clone());
        }
    }
}

/// Clock offset requested by a test fixture. Only honored by the manager in
/// testing mode; zero everywhere else.
pub fn test_time_offset(request_headers: &HeaderList) -> TimeDelta {
    // Clamped so a shifted clock stays well inside chrono's datetime range.
    const LIMIT_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

    request_headers
        .get(TEST_CACHE_TIME_OFFSET_HEADER)
        .and_then(|value| value.parse::<i64>().ok())
        .map(|seconds| TimeDelta::seconds(seconds.clamp(-LIMIT_SECONDS, LIMIT_SECONDS)))
        .unwrap_or_else(TimeDelta::zero)
}
