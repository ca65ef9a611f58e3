//! C-ABI wrapper around `text-request`.
//!
//! # Overview
//! Exposes the text request contract through `extern "C"` functions so a host
//! written in any language with a C FFI can build request payloads, derive
//! cache keys and decode responses while owning the network round trip and
//! completion callbacks itself.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Accessors mirror the core `Request` trait 1:1.
//! - The C caller owns all returned pointers and must call the matching
//!   `text_request_free_*` function to release them.

pub mod types;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use text_request::{HttpResponse, Request, TextRequest};

use types::*;

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

/// Create a new text request.
///
/// `method` is an `FfiHttpMethod` discriminant. `headers`/`params` may be
/// null when their length is 0. `body_json` is a JSON document or null for
/// no body. Returns null if `url` is null, `method` is unknown, any string is
/// not UTF-8, or `body_json` is not valid JSON.
/// The caller must free the returned pointer with `text_request_free`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_new(
    method: u32,
    url: *const c_char,
    headers: *const FfiKeyValue,
    headers_len: usize,
    params: *const FfiKeyValue,
    params_len: usize,
    body_json: *const c_char,
) -> *mut FfiTextRequest {
    catch_unwind(|| {
        let Some(method) = method_from_code(method) else {
            return std::ptr::null_mut();
        };
        let Some(url) = read_str(url) else {
            return std::ptr::null_mut();
        };
        let (Some(headers), Some(params)) =
            (read_pairs(headers, headers_len), read_pairs(params, params_len))
        else {
            return std::ptr::null_mut();
        };
        let body = if body_json.is_null() {
            None
        } else {
            let Some(value) = read_str(body_json)
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            else {
                return std::ptr::null_mut();
            };
            Some(value)
        };
        let inner = TextRequest::with_body(method, url, headers, params, body.as_ref(), |_| {});
        Box::into_raw(Box::new(FfiTextRequest { inner }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a request created by `text_request_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_free(req: *mut FfiTextRequest) {
    if !req.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(req) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

/// Encoded request body. Returns null when the request has no body (or if
/// `req` is null). Free with `text_request_free_bytes`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_body(req: *const FfiTextRequest) -> *mut FfiBytes {
    catch_unwind(AssertUnwindSafe(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        match req.inner.body() {
            Some(bytes) => FfiBytes::from_vec(bytes),
            None => std::ptr::null_mut(),
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Content type to send with the body. Free with `text_request_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_content_type(req: *const FfiTextRequest) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        to_c_string(req.inner.body_content_type().to_string())
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Key identifying this request in a cache. Free with `text_request_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_cache_key(req: *const FfiTextRequest) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        to_c_string(req.inner.cache_key())
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Snapshot the request as wire data. Free with `text_request_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_build(req: *const FfiTextRequest) -> *mut FfiHttpRequest {
    catch_unwind(AssertUnwindSafe(|| {
        if req.is_null() {
            return std::ptr::null_mut();
        }
        let req = unsafe { &*req };
        FfiHttpRequest::from_core(req.inner.to_http_request())
    }))
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Parse response
// ---------------------------------------------------------------------------

/// Decode a raw response received for `req`.
///
/// Decoding itself never fails; errors only report unusable arguments.
/// Free the result with `text_request_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_parse_response(
    req: *const FfiTextRequest,
    response: *const FfiHttpResponse,
) -> *mut FfiTextResult {
    catch_unwind(AssertUnwindSafe(|| {
        if req.is_null() {
            return FfiTextResult::null_arg("req");
        }
        if response.is_null() {
            return FfiTextResult::null_arg("response");
        }
        let req = unsafe { &*req };
        let resp = unsafe { &*response };
        let Some(headers) = read_pairs(resp.headers, resp.headers_len) else {
            return FfiTextResult::invalid_arg("response.headers");
        };
        let Some(body) = read_bytes(resp.body, resp.body_len) else {
            return FfiTextResult::invalid_arg("response.body");
        };
        let core_resp = HttpResponse {
            status: resp.status,
            headers,
            body,
        };
        FfiTextResult::ok(req.inner.parse_response(&core_resp))
    }))
    .unwrap_or_else(|_| FfiTextResult::panic("panic in text_request_parse_response"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiHttpRequest` returned by `text_request_build`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_free_request(req: *mut FfiHttpRequest) {
    if req.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let req = unsafe { Box::from_raw(req) };
        if !req.url.is_null() {
            drop(unsafe { CString::from_raw(req.url) });
        }
        drop(reclaim_slice(req.body, req.body_len));
        for h in reclaim_slice(req.headers, req.headers_len) {
            if !h.key.is_null() {
                drop(unsafe { CString::from_raw(h.key) });
            }
            if !h.value.is_null() {
                drop(unsafe { CString::from_raw(h.value) });
            }
        }
    });
}

/// Free an `FfiTextResult` returned by `text_request_parse_response`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_free_result(result: *mut FfiTextResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.etag.is_null() {
            drop(unsafe { CString::from_raw(result.etag) });
        }
        drop(reclaim_slice(result.text, result.text_len));
    });
}

/// Free an `FfiBytes` returned by `text_request_body`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_free_bytes(bytes: *mut FfiBytes) {
    if bytes.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let bytes = unsafe { Box::from_raw(bytes) };
        drop(reclaim_slice(bytes.data, bytes.len));
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn text_request_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
