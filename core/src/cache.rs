//! Cache metadata derived from HTTP response headers.
//!
//! # Design
//! The core only computes a `CacheEntry` from a response; storing and looking
//! it up is the cache store's job (see `dispatch::Cache`). Time is passed in
//! explicitly so freshness arithmetic is deterministic under test.
//!
//! Freshness rules:
//! - `Cache-Control: no-cache` or `no-store` means the response is not cached.
//! - `max-age` sets the soft TTL; `stale-while-revalidate` extends the hard
//!   TTL past it unless `must-revalidate`/`proxy-revalidate` is present.
//! - Without `Cache-Control`, `Expires - Date` is used for both TTLs.
//! - With neither, the entry is stale immediately (both TTLs at the epoch)
//!   but still carries validators for a conditional request.
//! - Lifetimes are capped at `MAX_LIFETIME_SECS`, so arbitrary header values
//!   never overflow `SystemTime`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::http::{header, Headers, HttpResponse};

/// Longest lifetime honored for any directive, about 136 years.
pub const MAX_LIFETIME_SECS: u64 = u32::MAX as u64;

/// Cached response body plus the metadata needed to judge its freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub etag: Option<String>,
    pub server_date: Option<SystemTime>,
    pub last_modified: Option<SystemTime>,
    /// Hard expiry: past this the entry must not be served.
    pub ttl: SystemTime,
    /// Soft expiry: past this the entry should be revalidated.
    pub soft_ttl: SystemTime,
    pub response_headers: Headers,
}

impl CacheEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.ttl < now
    }

    pub fn refresh_needed(&self, now: SystemTime) -> bool {
        self.soft_ttl < now
    }

    /// Validator headers for a conditional request revalidating this entry.
    pub fn conditional_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(etag) = &self.etag {
            headers.push(("If-None-Match".to_string(), etag.clone()));
        }
        if let Some(last_modified) = self.last_modified {
            headers.push((
                "If-Modified-Since".to_string(),
                httpdate::fmt_http_date(last_modified),
            ));
        }
        headers
    }
}

#[derive(Debug, Default)]
struct CacheControl {
    max_age: u64,
    stale_while_revalidate: u64,
    must_revalidate: bool,
}

impl CacheControl {
    /// `None` when the directives forbid caching.
    fn parse(value: &str) -> Option<Self> {
        let mut directives = CacheControl::default();
        for token in value.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if token == "no-cache" || token == "no-store" {
                return None;
            } else if let Some(seconds) = token.strip_prefix("max-age=") {
                directives.max_age = seconds.parse().unwrap_or(0);
            } else if let Some(seconds) = token.strip_prefix("stale-while-revalidate=") {
                directives.stale_while_revalidate = seconds.parse().unwrap_or(0);
            } else if token == "must-revalidate" || token == "proxy-revalidate" {
                directives.must_revalidate = true;
            }
        }
        Some(directives)
    }
}

fn parse_date(value: &str) -> Option<SystemTime> {
    match httpdate::parse_http_date(value) {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::debug!(value, %err, "ignoring unparsable date header");
            None
        }
    }
}

/// `time + secs` with `secs` capped at `MAX_LIFETIME_SECS`. Yields `time`
/// when the sum is not representable.
fn after(time: SystemTime, secs: u64) -> SystemTime {
    let lifetime = Duration::from_secs(secs.min(MAX_LIFETIME_SECS));
    time.checked_add(lifetime).unwrap_or(time)
}

/// Derive cache metadata from `response`, or `None` if it must not be cached.
pub fn parse_cache_headers(response: &HttpResponse, now: SystemTime) -> Option<CacheEntry> {
    let headers = &response.headers;

    let cache_control = match header(headers, "Cache-Control") {
        Some(value) => Some(CacheControl::parse(value)?),
        None => None,
    };
    let server_date = header(headers, "Date").and_then(parse_date);
    let expires = header(headers, "Expires").and_then(parse_date);
    let last_modified = header(headers, "Last-Modified").and_then(parse_date);
    let etag = header(headers, "ETag").map(str::to_string);

    let (soft_ttl, ttl) = match (cache_control, server_date, expires) {
        (Some(directives), _, _) => {
            let soft = after(now, directives.max_age);
            let hard = if directives.must_revalidate {
                soft
            } else {
                after(soft, directives.stale_while_revalidate)
            };
            (soft, hard)
        }
        (None, Some(date), Some(expires)) if expires >= date => {
            let lifetime = expires.duration_since(date).unwrap_or_default();
            let ttl = after(now, lifetime.as_secs());
            (ttl, ttl)
        }
        _ => (UNIX_EPOCH, UNIX_EPOCH),
    };

    Some(CacheEntry {
        data: response.body.clone(),
        etag,
        server_date,
        last_modified,
        ttl,
        soft_ttl,
        response_headers: headers.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn response(headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: b"payload".to_vec(),
        }
    }

    #[test]
    fn no_store_is_not_cached() {
        assert!(parse_cache_headers(&response(&[("Cache-Control", "no-store")]), now()).is_none());
        assert!(
            parse_cache_headers(&response(&[("cache-control", "private, No-Cache")]), now())
                .is_none()
        );
    }

    #[test]
    fn max_age_sets_both_ttls() {
        let entry =
            parse_cache_headers(&response(&[("Cache-Control", "public, max-age=60")]), now())
                .unwrap();
        assert_eq!(entry.soft_ttl, now() + Duration::from_secs(60));
        assert_eq!(entry.ttl, now() + Duration::from_secs(60));
        assert_eq!(entry.data, b"payload");
    }

    #[test]
    fn stale_while_revalidate_extends_hard_ttl() {
        let entry = parse_cache_headers(
            &response(&[("Cache-Control", "max-age=60, stale-while-revalidate=30")]),
            now(),
        )
        .unwrap();
        assert_eq!(entry.soft_ttl, now() + Duration::from_secs(60));
        assert_eq!(entry.ttl, now() + Duration::from_secs(90));
        assert!(!entry.refresh_needed(now() + Duration::from_secs(59)));
        assert!(entry.refresh_needed(now() + Duration::from_secs(61)));
        assert!(!entry.is_expired(now() + Duration::from_secs(61)));
        assert!(entry.is_expired(now() + Duration::from_secs(91)));
    }

    #[test]
    fn huge_directives_are_capped() {
        let entry = parse_cache_headers(
            &response(&[(
                "Cache-Control",
                "max-age=9999999999999999999, stale-while-revalidate=18446744073709551615",
            )]),
            now(),
        )
        .unwrap();
        let cap = Duration::from_secs(MAX_LIFETIME_SECS);
        assert_eq!(entry.soft_ttl, now() + cap);
        assert_eq!(entry.ttl, now() + cap + cap);
        assert!(!entry.is_expired(now() + Duration::from_secs(100 * 365 * 24 * 3600)));
    }

    #[test]
    fn must_revalidate_ignores_stale_window() {
        let entry = parse_cache_headers(
            &response(&[(
                "Cache-Control",
                "max-age=60, stale-while-revalidate=30, must-revalidate",
            )]),
            now(),
        )
        .unwrap();
        assert_eq!(entry.ttl, entry.soft_ttl);
    }

    #[test]
    fn expires_minus_date_without_cache_control() {
        let entry = parse_cache_headers(
            &response(&[
                ("Date", "Tue, 14 Nov 2023 22:13:20 GMT"),
                ("Expires", "Tue, 14 Nov 2023 23:13:20 GMT"),
            ]),
            now(),
        )
        .unwrap();
        assert_eq!(entry.soft_ttl, now() + Duration::from_secs(3600));
        assert_eq!(entry.ttl, entry.soft_ttl);
        assert_eq!(entry.server_date, Some(now()));
    }

    #[test]
    fn no_freshness_information_is_immediately_stale() {
        let entry =
            parse_cache_headers(&response(&[("ETag", "\"v1\""), ("Expires", "0")]), now())
                .unwrap();
        assert!(entry.is_expired(now()));
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn conditional_headers_carry_validators() {
        let entry = parse_cache_headers(
            &response(&[
                ("ETag", "\"v2\""),
                ("Last-Modified", "Tue, 14 Nov 2023 22:13:20 GMT"),
            ]),
            now(),
        )
        .unwrap();
        assert_eq!(
            entry.conditional_headers(),
            vec![
                ("If-None-Match".to_string(), "\"v2\"".to_string()),
                (
                    "If-Modified-Since".to_string(),
                    "Tue, 14 Nov 2023 22:13:20 GMT".to_string()
                ),
            ]
        );
    }
}
