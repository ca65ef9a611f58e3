//! Text request core: one HTTP exchange whose body is text.
//!
//! # Overview
//! Describes a request (method, URL, headers, params, optional JSON body) as
//! plain data and decodes the raw response bytes into a `String` using the
//! charset the server advertises, without touching the network
//! (host-does-IO pattern). The dispatcher executes the round trip.
//!
//! # Design
//! - `TextRequest` fixes all of its fields at construction; every accessor
//!   is pure, so a dispatcher may call them any number of times.
//! - Response decoding never fails: an unusable charset falls back to a
//!   configured encoding (`CharsetResolver`).
//! - Cache metadata is computed from response headers; storage is left to a
//!   `Cache` implementation.
//! - Completion is a single listener consumed by `Request::deliver`.

pub mod cache;
pub mod charset;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod request;

pub use cache::{parse_cache_headers, CacheEntry};
pub use charset::{CharsetConfig, CharsetResolver, Decoded, DEFAULT_CHARSET};
pub use dispatch::{dispatch, Cache, MemoryCache, Transport};
pub use error::RequestError;
pub use http::{header, Headers, HttpMethod, HttpRequest, HttpResponse};
pub use request::{
    Listener, Request, Response, TextRequest, PROTOCOL_CHARSET, PROTOCOL_CONTENT_TYPE,
};
