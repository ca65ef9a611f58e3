//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The core
//! crate builds `HttpRequest` values and decodes `HttpResponse` values without
//! ever touching the network; the dispatcher (host) executes the actual I/O.
//!
//! All fields use owned types (`String`, `Vec`, `BTreeMap`) so values can
//! cross FFI boundaries without lifetime concerns. Header and parameter maps
//! are `BTreeMap`s: keys are unique and iteration order is deterministic,
//! which keeps derived cache keys stable.

use std::collections::BTreeMap;
use std::fmt;

/// Header or parameter mapping. Keys are unique; iteration is sorted by key.
pub type Headers = BTreeMap<String, String>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// An HTTP request described as plain data, ready to be put on the wire.
///
/// Produced by `Request::to_http_request`. The dispatcher is responsible for
/// executing this request against the network and returning the
/// corresponding `HttpResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// A raw HTTP response described as plain data.
///
/// Constructed by the dispatcher after executing an `HttpRequest`, then
/// passed to `Request::parse_response` for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_renders_upper_case_verb() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        assert_eq!(header(&headers, "Content-Type"), Some("text/plain"));
        assert_eq!(header(&headers, "ETag"), None);
    }

    #[test]
    fn success_range_is_2xx() {
        let mut response = HttpResponse {
            status: 204,
            headers: Headers::new(),
            body: Vec::new(),
        };
        assert!(response.is_success());
        response.status = 304;
        assert!(!response.is_success());
    }
}
