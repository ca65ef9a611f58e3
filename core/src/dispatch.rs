//! Dispatcher seam: the traits a host implements to drive requests, and a
//! synchronous reference loop that runs one request lifecycle.
//!
//! # Design
//! The core never performs I/O. A `Transport` executes an `HttpRequest` and
//! returns the raw `HttpResponse`; a `Cache` stores entries under the
//! request's cache key. `dispatch` glues them together and guarantees that
//! the request's listener is called exactly once, whatever path is taken.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::cache::{parse_cache_headers, CacheEntry};
use crate::error::RequestError;
use crate::http::{HttpRequest, HttpResponse};
use crate::request::Request;

/// Executes a request on the network.
pub trait Transport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError>;
}

/// Cache store keyed by `Request::cache_key`.
pub trait Cache {
    fn get(&self, key: &str) -> Option<CacheEntry>;

    fn put(&self, key: &str, entry: CacheEntry);
}

/// In-process `Cache` backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, entry: CacheEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }
}

/// Run `request` to completion and deliver its outcome exactly once.
///
/// Order of resolution:
/// 1. an unexpired cache entry is decoded and delivered without waiting on
///    the network; past its soft TTL it is then refreshed with a conditional
///    request that only updates the cache;
/// 2. otherwise the request is sent, with validators from a stale entry;
/// 3. `304 Not Modified` re-serves the stale entry with refreshed metadata;
/// 4. a 2xx response is decoded, cached when allowed, and delivered;
/// 5. any other status or a transport failure is delivered as an error.
pub fn dispatch<R, T, C>(transport: &T, cache: &C, request: R)
where
    R: Request,
    T: Transport + ?Sized,
    C: Cache + ?Sized,
{
    let now = SystemTime::now();
    let key = request.cache_key();

    match cache.get(&key) {
        Some(entry) if !entry.is_expired(now) => {
            tracing::debug!(%key, "cache hit");
            let parsed = request.parse_response(&cached_response(&entry, None));
            let refresh = entry
                .refresh_needed(now)
                .then(|| request.to_http_request());
            request.deliver(Ok(parsed.result));
            if let Some(http_request) = refresh {
                revalidate(transport, cache, &key, &entry, http_request, now);
            }
        }
        cached => {
            let outcome = fetch(transport, cache, &request, &key, cached);
            request.deliver(outcome);
        }
    }
}

fn fetch<R, T, C>(
    transport: &T,
    cache: &C,
    request: &R,
    key: &str,
    cached: Option<CacheEntry>,
) -> Result<R::Output, RequestError>
where
    R: Request,
    T: Transport + ?Sized,
    C: Cache + ?Sized,
{
    let mut http_request = request.to_http_request();
    if let Some(entry) = &cached {
        http_request.headers.extend(entry.conditional_headers());
    }
    tracing::debug!(method = %http_request.method, url = %http_request.url, "sending request");

    let response = transport.execute(&http_request).inspect_err(|err| {
        tracing::warn!(url = %http_request.url, %err, "transport failed");
    })?;

    let response = match (response.status, cached) {
        (304, Some(entry)) => {
            tracing::debug!(%key, "not modified, serving cached body");
            cached_response(&entry, Some(&response))
        }
        _ if response.is_success() => response,
        _ => {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            return Err(RequestError::Http {
                status: response.status,
                body,
            });
        }
    };

    let parsed = request.parse_response(&response);
    if let Some(entry) = parsed.cache_entry {
        cache.put(key, entry);
    }
    Ok(parsed.result)
}

/// Refresh a soft-expired entry after it has been served. Failures leave the
/// entry in place until its hard TTL.
fn revalidate<T, C>(
    transport: &T,
    cache: &C,
    key: &str,
    entry: &CacheEntry,
    mut http_request: HttpRequest,
    now: SystemTime,
) where
    T: Transport + ?Sized,
    C: Cache + ?Sized,
{
    http_request.headers.extend(entry.conditional_headers());
    tracing::debug!(%key, "revalidating soft-expired entry");

    let response = match transport.execute(&http_request) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%key, %err, "revalidation failed");
            return;
        }
    };
    let response = match response.status {
        304 => cached_response(entry, Some(&response)),
        _ if response.is_success() => response,
        status => {
            tracing::warn!(%key, status, "revalidation returned an error status");
            return;
        }
    };
    if let Some(refreshed) = parse_cache_headers(&response, now) {
        cache.put(key, refreshed);
    }
}

/// Rebuild a response from a cache entry, overlaying `fresh` headers from a
/// `304` so the entry's freshness is recomputed.
fn cached_response(entry: &CacheEntry, fresh: Option<&HttpResponse>) -> HttpResponse {
    let mut headers = entry.response_headers.clone();
    if let Some(fresh) = fresh {
        for (name, value) in &fresh.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }
    }
    HttpResponse {
        status: 200,
        headers,
        body: entry.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::mpsc;
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::http::{Headers, HttpMethod};
    use crate::request::TextRequest;

    /// Replays canned responses and records every request it sees.
    struct ScriptedTransport {
        responses: RefCell<Vec<Result<HttpResponse, RequestError>>>,
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse, RequestError>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
            self.seen.borrow_mut().push(request.clone());
            self.responses.borrow_mut().remove(0)
        }
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn request() -> (TextRequest, mpsc::Receiver<Result<String, RequestError>>) {
        let (tx, rx) = mpsc::channel();
        let req = TextRequest::new(HttpMethod::Get, "http://example.test/items", move |r| {
            tx.send(r).unwrap();
        });
        (req, rx)
    }

    fn single(rx: mpsc::Receiver<Result<String, RequestError>>) -> Result<String, RequestError> {
        let outcome = rx.recv().unwrap();
        assert!(rx.try_recv().is_err(), "listener called more than once");
        outcome
    }

    #[test]
    fn success_is_delivered_and_cached() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            200,
            &[
                ("Content-Type", "text/plain; charset=utf-8"),
                ("Cache-Control", "max-age=60"),
            ],
            "fresh",
        ))]);
        let cache = MemoryCache::new();
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("fresh".to_string()));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("http://example.test/items").is_some());
    }

    #[test]
    fn fresh_cache_entry_skips_network() {
        let transport = ScriptedTransport::new(Vec::new());
        let cache = MemoryCache::new();
        cache.put(
            "http://example.test/items",
            CacheEntry {
                data: b"cached".to_vec(),
                etag: None,
                server_date: None,
                last_modified: None,
                ttl: SystemTime::now() + Duration::from_secs(600),
                soft_ttl: SystemTime::now() + Duration::from_secs(600),
                response_headers: Headers::new(),
            },
        );
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("cached".to_string()));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn stale_entry_is_revalidated_on_304() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            304,
            &[("Cache-Control", "max-age=120")],
            "",
        ))]);
        let cache = MemoryCache::new();
        let mut stale_headers = Headers::new();
        stale_headers.insert("ETag".to_string(), "\"v1\"".to_string());
        stale_headers.insert("Cache-Control".to_string(), "max-age=0".to_string());
        cache.put(
            "http://example.test/items",
            CacheEntry {
                data: b"old body".to_vec(),
                etag: Some("\"v1\"".to_string()),
                server_date: None,
                last_modified: None,
                ttl: UNIX_EPOCH,
                soft_ttl: UNIX_EPOCH,
                response_headers: stale_headers,
            },
        );
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("old body".to_string()));
        let sent = transport.seen.borrow();
        assert!(sent[0]
            .headers
            .contains(&("If-None-Match".to_string(), "\"v1\"".to_string())));
        let refreshed = cache.get("http://example.test/items").unwrap();
        assert!(!refreshed.is_expired(SystemTime::now()));
        assert_eq!(refreshed.etag.as_deref(), Some("\"v1\""));
    }

    fn soft_expired_entry(body: &[u8]) -> CacheEntry {
        let mut headers = Headers::new();
        headers.insert("ETag".to_string(), "\"v1\"".to_string());
        CacheEntry {
            data: body.to_vec(),
            etag: Some("\"v1\"".to_string()),
            server_date: None,
            last_modified: None,
            ttl: SystemTime::now() + Duration::from_secs(600),
            soft_ttl: UNIX_EPOCH,
            response_headers: headers,
        }
    }

    #[test]
    fn soft_expired_entry_is_served_then_refreshed() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            200,
            &[
                ("Cache-Control", "max-age=60"),
                ("ETag", "\"v2\""),
            ],
            "new body",
        ))]);
        let cache = MemoryCache::new();
        cache.put("http://example.test/items", soft_expired_entry(b"old body"));
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("old body".to_string()));
        let sent = transport.seen.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .headers
            .contains(&("If-None-Match".to_string(), "\"v1\"".to_string())));
        let refreshed = cache.get("http://example.test/items").unwrap();
        assert_eq!(refreshed.data, b"new body");
        assert_eq!(refreshed.etag.as_deref(), Some("\"v2\""));
        assert!(!refreshed.refresh_needed(SystemTime::now()));
    }

    #[test]
    fn failed_refresh_keeps_soft_expired_entry() {
        let transport =
            ScriptedTransport::new(vec![Err(RequestError::Network("refused".to_string()))]);
        let cache = MemoryCache::new();
        cache.put("http://example.test/items", soft_expired_entry(b"old body"));
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("old body".to_string()));
        assert_eq!(transport.seen.borrow().len(), 1);
        let kept = cache.get("http://example.test/items").unwrap();
        assert_eq!(kept.data, b"old body");
        assert!(kept.refresh_needed(SystemTime::now()));
    }

    #[test]
    fn huge_max_age_is_still_delivered() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            200,
            &[("Cache-Control", "max-age=9999999999999999999")],
            "forever",
        ))]);
        let cache = MemoryCache::new();
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("forever".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn non_success_status_is_an_error() {
        let transport =
            ScriptedTransport::new(vec![Ok(response(503, &[], "try later"))]);
        let cache = MemoryCache::new();
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(
            single(rx),
            Err(RequestError::Http {
                status: 503,
                body: "try later".to_string()
            })
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn transport_error_is_delivered() {
        let transport =
            ScriptedTransport::new(vec![Err(RequestError::Network("refused".to_string()))]);
        let cache = MemoryCache::new();
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Err(RequestError::Network("refused".to_string())));
    }

    #[test]
    fn uncacheable_response_is_not_stored() {
        let transport = ScriptedTransport::new(vec![Ok(response(
            200,
            &[("Cache-Control", "no-store")],
            "secret",
        ))]);
        let cache = MemoryCache::new();
        let (req, rx) = request();
        dispatch(&transport, &cache, req);

        assert_eq!(single(rx), Ok("secret".to_string()));
        assert!(cache.is_empty());
    }
}
