//! The request contract a dispatcher drives, and its text implementation.
//!
//! # Design
//! A request is built once with every field fixed, read by the dispatcher
//! through pure accessors, then consumed by `deliver`. Taking `self` by value
//! in `deliver` means a request can report its outcome at most once; the
//! dispatcher is responsible for calling it exactly once.

use std::fmt;
use std::time::SystemTime;

use encoding_rs::Encoding;

use crate::cache::{parse_cache_headers, CacheEntry};
use crate::charset::CharsetResolver;
use crate::error::RequestError;
use crate::http::{header, Headers, HttpMethod, HttpRequest, HttpResponse};

/// Charset used to encode request bodies.
pub const PROTOCOL_CHARSET: &str = "utf-8";

/// Content type advertised for every text request, body or not.
pub const PROTOCOL_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A decoded response together with the cache metadata derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    pub result: T,
    /// `None` when the response headers forbid caching.
    pub cache_entry: Option<CacheEntry>,
}

/// Completion listener: receives the decoded result or the dispatcher's error.
pub type Listener<T> = Box<dyn FnOnce(Result<T, RequestError>) + Send + 'static>;

/// What a dispatcher needs from a request.
pub trait Request {
    type Output;

    fn method(&self) -> HttpMethod;

    fn url(&self) -> &str;

    fn headers(&self) -> &Headers;

    /// Informational; never merged into the body.
    fn params(&self) -> &Headers;

    /// Encoded body, or `None` when there is nothing to send.
    fn body(&self) -> Option<Vec<u8>>;

    fn body_content_type(&self) -> &str;

    fn cache_key(&self) -> String;

    fn parse_response(&self, response: &HttpResponse) -> Response<Self::Output>;

    /// Hand the outcome to the caller. Consumes the request.
    fn deliver(self, outcome: Result<Self::Output, RequestError>);

    /// Snapshot of the request as wire data. A `Content-Type` header is added
    /// when a body is present and the caller did not set one.
    fn to_http_request(&self) -> HttpRequest {
        let mut headers: Vec<(String, String)> = self
            .headers()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let body = self.body();
        if body.is_some() && header(self.headers(), "Content-Type").is_none() {
            headers.push((
                "Content-Type".to_string(),
                self.body_content_type().to_string(),
            ));
        }
        HttpRequest {
            method: self.method(),
            url: self.url().to_string(),
            headers,
            body,
        }
    }
}

/// A request whose response body is delivered as a `String`.
pub struct TextRequest {
    method: HttpMethod,
    url: String,
    headers: Headers,
    params: Headers,
    body_text: Option<String>,
    resolver: CharsetResolver,
    listener: Listener<String>,
}

impl fmt::Debug for TextRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body_text", &self.body_text)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl TextRequest {
    pub fn new<F>(method: HttpMethod, url: impl Into<String>, listener: F) -> Self
    where
        F: FnOnce(Result<String, RequestError>) + Send + 'static,
    {
        Self::with_headers(method, url, Headers::new(), listener)
    }

    pub fn with_headers<F>(
        method: HttpMethod,
        url: impl Into<String>,
        headers: Headers,
        listener: F,
    ) -> Self
    where
        F: FnOnce(Result<String, RequestError>) + Send + 'static,
    {
        Self {
            method,
            url: url.into(),
            headers,
            params: Headers::new(),
            body_text: None,
            resolver: CharsetResolver::default(),
            listener: Box::new(listener),
        }
    }

    /// Full constructor. `body` is rendered to compact JSON text right away;
    /// `None` means no body at all, as opposed to an empty one.
    pub fn with_body<F>(
        method: HttpMethod,
        url: impl Into<String>,
        headers: Headers,
        params: Headers,
        body: Option<&serde_json::Value>,
        listener: F,
    ) -> Self
    where
        F: FnOnce(Result<String, RequestError>) + Send + 'static,
    {
        let url = url.into();
        tracing::debug!(%url, ?headers, ?params, "text request created");
        Self {
            method,
            url,
            headers,
            params,
            body_text: body.map(serde_json::Value::to_string),
            resolver: CharsetResolver::default(),
            listener: Box::new(listener),
        }
    }

    /// Replace the charset resolver used by `parse_response`.
    pub fn with_resolver(mut self, resolver: CharsetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body_text.as_deref()
    }

    /// Encode the body with the protocol charset, reporting failure
    /// explicitly. `Ok(None)` means the request has no body.
    pub fn encode_body(&self) -> Result<Option<Vec<u8>>, RequestError> {
        let Some(text) = &self.body_text else {
            return Ok(None);
        };
        let encoding = Encoding::for_label(PROTOCOL_CHARSET.as_bytes())
            .ok_or_else(|| RequestError::UnsupportedCharset(PROTOCOL_CHARSET.to_string()))?;
        let (bytes, used, unmappable) = encoding.encode(text);
        if used != encoding || unmappable {
            return Err(RequestError::UnsupportedCharset(encoding.name().to_string()));
        }
        Ok(Some(bytes.into_owned()))
    }

    /// Like `parse_response`, with an explicit clock for cache freshness.
    pub fn parse_response_at(&self, response: &HttpResponse, now: SystemTime) -> Response<String> {
        let decoded = self.resolver.decode(&response.headers, &response.body);
        Response {
            result: decoded.text,
            cache_entry: parse_cache_headers(response, now),
        }
    }
}

impl Request for TextRequest {
    type Output = String;

    fn method(&self) -> HttpMethod {
        self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn params(&self) -> &Headers {
        &self.params
    }

    /// Encoding failures are logged and reported as "no body".
    fn body(&self) -> Option<Vec<u8>> {
        match self.encode_body() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(
                    body = ?self.body_text,
                    charset = PROTOCOL_CHARSET,
                    %err,
                    "unsupported encoding while getting request body bytes"
                );
                None
            }
        }
    }

    fn body_content_type(&self) -> &str {
        PROTOCOL_CONTENT_TYPE
    }

    /// URL followed by every header as `key` + `value`. The header map is
    /// walked twice; existing cache entries depend on this exact layout.
    fn cache_key(&self) -> String {
        let mut key = self.url.clone();
        for (name, value) in self.headers.iter().chain(self.headers.iter()) {
            key.push_str(name);
            key.push_str(value);
        }
        key
    }

    fn parse_response(&self, response: &HttpResponse) -> Response<String> {
        self.parse_response_at(response, SystemTime::now())
    }

    fn deliver(self, outcome: Result<String, RequestError>) {
        (self.listener)(outcome);
    }
}
