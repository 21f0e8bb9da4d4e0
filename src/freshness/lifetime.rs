use super::policy::{directive_value, has_directive};
use crate::headers::HeaderList;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// How a stored response may be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLifetimeStatus {
    /// Serve as-is.
    Fresh,
    /// Unusable; delete or refetch.
    Expired,
    /// Serve only after successful revalidation.
    MustRevalidate,
    /// Serve immediately, revalidate in the background.
    StaleWhileRevalidate,
}

/// Parses an IMF-fixdate header value (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

fn header_date(headers: &HeaderList, name: &str) -> Option<DateTime<Utc>> {
    headers.get(name).and_then(parse_http_date)
}

// Header values are attacker-controlled; seconds counts past chrono's range
// saturate instead of panicking.
fn saturating_seconds(value: i64) -> TimeDelta {
    TimeDelta::try_seconds(value).unwrap_or(if value < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}

fn directive_seconds(headers: &HeaderList, name: &str) -> Option<TimeDelta> {
    directive_value(headers, name)
        .and_then(|value| value.parse::<i64>().ok())
        .map(saturating_seconds)
}

// https://httpwg.org/specs/rfc9111.html#heuristic.freshness
//
// 10% of the time since Last-Modified, when a Last-Modified date exists and
// is in the past.
fn heuristic_freshness_lifetime(headers: &HeaderList, clock_offset: TimeDelta) -> TimeDelta {
    let Some(last_modified) = header_date(headers, "Last-Modified") else {
        return TimeDelta::zero();
    };

    let now = Utc::now() + clock_offset;
    let since_last_modified = (now - last_modified).num_seconds();
    if since_last_modified <= 0 {
        return TimeDelta::zero();
    }

    TimeDelta::seconds(since_last_modified / 10)
}

// https://httpwg.org/specs/rfc9111.html#calculating.freshness.lifetime
//
// First match wins: max-age directive, then Expires minus Date (receive time
// when Date is absent), then the heuristic where permitted. s-maxage is
// ignored; this is a private cache.
pub fn calculate_freshness_lifetime(
    status_code: u32,
    response_headers: &HeaderList,
    clock_offset: TimeDelta,
) -> TimeDelta {
    if let Some(max_age) = directive_seconds(response_headers, "max-age") {
        return max_age;
    }

    if let Some(expires) = header_date(response_headers, "Expires") {
        let date =
            header_date(response_headers, "Date").unwrap_or_else(|| Utc::now() + clock_offset);
        return expires - date;
    }

    // Heuristics apply only to heuristically cacheable status codes or
    // responses explicitly marked cacheable.
    let heuristics_allowed = matches!(
        status_code,
        200 | 203 | 204 | 206 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501
    ) || has_directive(response_headers, "public");

    if heuristics_allowed {
        return heuristic_freshness_lifetime(response_headers, clock_offset);
    }

    TimeDelta::zero()
}

// https://httpwg.org/specs/rfc9111.html#age.calculations
pub fn calculate_age(
    response_headers: &HeaderList,
    request_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
    clock_offset: TimeDelta,
) -> TimeDelta {
    let age_value = response_headers
        .get("Age")
        .and_then(|age| age.parse::<i64>().ok())
        .map(saturating_seconds)
        .unwrap_or_else(TimeDelta::zero);

    let now = Utc::now() + clock_offset;
    let date_value = header_date(response_headers, "Date").unwrap_or(now);

    let apparent_age = (response_time - date_value).max(TimeDelta::zero());

    let response_delay = response_time - request_time;
    let corrected_age_value = age_value
        .checked_add(&response_delay)
        .unwrap_or(TimeDelta::MAX);

    let corrected_initial_age = apparent_age.max(corrected_age_value);

    let resident_time = now - response_time;
    corrected_initial_age
        .checked_add(&resident_time)
        .unwrap_or(TimeDelta::MAX)
}

/// Classifies a stored response given its computed freshness lifetime and
/// current age.
///
/// A `no-cache` directive (on the request or the response) forces
/// revalidation regardless of age. Otherwise the response is `Fresh` strictly
/// below its freshness lifetime; at or past it, `must-revalidate` demands
/// revalidation, a `stale-while-revalidate` window permits serving stale
/// while revalidating, and anything else is `Expired`. Revalidation statuses
/// require a validator (`ETag` or `Last-Modified`) to be actionable; without
/// one they degrade to `Expired`.
pub fn cache_lifetime_status(
    request_headers: &HeaderList,
    response_headers: &HeaderList,
    freshness_lifetime: TimeDelta,
    current_age: TimeDelta,
) -> CacheLifetimeStatus {
    let revalidation_status = || {
        if response_headers.contains("Last-Modified") || response_headers.contains("ETag") {
            CacheLifetimeStatus::MustRevalidate
        } else {
            CacheLifetimeStatus::Expired
        }
    };

    if has_directive(response_headers, "no-cache") || has_directive(request_headers, "no-cache") {
        return revalidation_status();
    }

    if current_age < freshness_lifetime {
        return CacheLifetimeStatus::Fresh;
    }

    if has_directive(response_headers, "must-revalidate") {
        return revalidation_status();
    }

    if let Some(window) = directive_seconds(response_headers, "stale-while-revalidate") {
        let stale_deadline = freshness_lifetime
            .checked_add(&window)
            .unwrap_or(TimeDelta::MAX);
        if current_age < stale_deadline
            && revalidation_status() == CacheLifetimeStatus::MustRevalidate
        {
            return CacheLifetimeStatus::StaleWhileRevalidate;
        }
    }

    CacheLifetimeStatus::Expired
}
