use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const UTF8_TEXT: &str = "h\u{e9}llo w\u{f6}rld \u{65e5}\u{672c}";
pub const LATIN1_TEXT: &str = "caf\u{e9} cr\u{e8}me";
pub const UTF16_TEXT: &str = "\u{3053}\u{3093}\u{306b}\u{3061}\u{306f} \u{1F600}";
pub const PLAIN_TEXT: &str = "plain ascii";
pub const CACHED_TEXT: &str = "cached payload";
pub const CACHED_ETAG: &str = "\"v1\"";

/// What `/echo` saw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug, Default)]
pub struct AppState {
    cached_hits: Arc<AtomicUsize>,
}

pub fn app() -> Router {
    Router::new()
        .route("/text/utf8", get(utf8_text))
        .route("/text/latin1", get(latin1_text))
        .route("/text/utf16", get(utf16_text))
        .route("/text/bogus", get(bogus_charset_text))
        .route("/text/plain", get(plain_text))
        .route("/echo", any(echo))
        .route("/headers", get(request_headers))
        .route("/cached", get(cached))
        .route("/cached/hits", get(cached_hits))
        .route("/status/{code}", get(status))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// ISO-8859-1 bytes of `text`. Only defined for code points below U+0100.
pub fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u8).collect()
}

/// Big-endian UTF-16 with a leading byte-order mark.
pub fn utf16_bytes(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

async fn utf8_text() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], UTF8_TEXT)
}

async fn latin1_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=ISO-8859-1")],
        latin1_bytes(LATIN1_TEXT),
    )
}

async fn utf16_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-16")],
        utf16_bytes(UTF16_TEXT),
    )
}

async fn bogus_charset_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=x-no-such-charset")],
        UTF8_TEXT,
    )
}

async fn plain_text() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], PLAIN_TEXT)
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    tracing::debug!(%method, ?content_type, len = body.len(), "echo");
    (
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        Json(Echo {
            method: method.to_string(),
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
        }),
    )
}

async fn request_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    Json(
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
    )
}

async fn cached(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.cached_hits.fetch_add(1, Ordering::SeqCst);
    let revalidating = headers
        .get(header::IF_NONE_MATCH)
        .is_some_and(|v| v.as_bytes() == CACHED_ETAG.as_bytes());
    if revalidating {
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, CACHED_ETAG),
                (header::CACHE_CONTROL, "max-age=60"),
            ],
        )
            .into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "max-age=60"),
            (header::ETAG, CACHED_ETAG),
        ],
        CACHED_TEXT,
    )
        .into_response()
}

async fn cached_hits(State(state): State<AppState>) -> Json<usize> {
    Json(state.cached_hits.load(Ordering::SeqCst))
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {code}"))
}
