//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` instead of `String`, pointer + length instead of `Vec`, and
//! enums with explicit discriminants. Arrays handed to C are boxed slices so
//! they can be released with the exact length they were allocated with.
//! Conversion functions live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::time::{SystemTime, UNIX_EPOCH};

use text_request::{CacheEntry, Headers, HttpMethod, Response};

/// Opaque handle to a `TextRequest`. C callers receive a pointer to this
/// and pass it back into every FFI function.
pub struct FfiTextRequest {
    pub(crate) inner: text_request::TextRequest,
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// HTTP method as a C enum. Inputs take the discriminant as a `u32`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Head = 4,
    Options = 5,
    Trace = 6,
    Patch = 7,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Head => FfiHttpMethod::Head,
            HttpMethod::Options => FfiHttpMethod::Options,
            HttpMethod::Trace => FfiHttpMethod::Trace,
            HttpMethod::Patch => FfiHttpMethod::Patch,
        }
    }
}

/// Map a C method discriminant back to the core enum.
pub(crate) fn method_from_code(code: u32) -> Option<HttpMethod> {
    Some(match code {
        0 => HttpMethod::Get,
        1 => HttpMethod::Post,
        2 => HttpMethod::Put,
        3 => HttpMethod::Delete,
        4 => HttpMethod::Head,
        5 => HttpMethod::Options,
        6 => HttpMethod::Trace,
        7 => HttpMethod::Patch,
        _ => return None,
    })
}

/// A borrowed key-value pair supplied by the C caller (headers, params).
#[repr(C)]
pub struct FfiKeyValue {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// A single HTTP header owned by this library.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// A byte buffer owned by this library.
#[repr(C)]
pub struct FfiBytes {
    pub data: *mut u8,
    pub len: usize,
}

impl FfiBytes {
    pub(crate) fn from_vec(bytes: Vec<u8>) -> *mut Self {
        let (data, len) = leak_slice(bytes);
        Box::into_raw(Box::new(FfiBytes { data, len }))
    }
}

/// An HTTP request described as C-compatible plain data.
///
/// Built by `text_request_build`. The C caller executes the request and
/// passes the response back through `text_request_parse_response`.
#[repr(C)]
pub struct FfiHttpRequest {
    pub method: FfiHttpMethod,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: usize,
    /// Null when the request has no body.
    pub body: *mut u8,
    pub body_len: usize,
}

impl FfiHttpRequest {
    /// Convert a core `HttpRequest` into a heap-allocated `FfiHttpRequest`.
    pub(crate) fn from_core(req: text_request::HttpRequest) -> *mut Self {
        let headers: Vec<FfiHeader> = req
            .headers
            .into_iter()
            .map(|(k, v)| FfiHeader {
                key: to_c_string(k),
                value: to_c_string(v),
            })
            .collect();
        let (headers, headers_len) = leak_slice(headers);
        let (body, body_len) = match req.body {
            Some(b) => leak_slice(b),
            None => (std::ptr::null_mut(), 0),
        };

        Box::into_raw(Box::new(FfiHttpRequest {
            method: req.method.into(),
            url: to_c_string(req.url),
            headers,
            headers_len,
            body,
            body_len,
        }))
    }
}

// ---------------------------------------------------------------------------
// Response input (caller-provided, not heap-allocated by us)
// ---------------------------------------------------------------------------

/// A raw HTTP response described as C-compatible plain data.
///
/// The C caller constructs this on the stack after executing an HTTP request,
/// then passes a pointer to `text_request_parse_response`. The FFI layer
/// reads but does not free these fields.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub headers: *const FfiKeyValue,
    pub headers_len: usize,
    pub body: *const u8,
    pub body_len: usize,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiTextResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidArg = 2,
    Panic = 3,
}

/// Result envelope for `text_request_parse_response`.
///
/// On success `error_code` is `Ok`, `error_message` is null and `text` holds
/// the decoded UTF-8 text (not NUL-terminated). `cacheable` is false when the
/// response forbids caching; otherwise the cache fields are filled in, with
/// TTLs as milliseconds since the Unix epoch.
#[repr(C)]
pub struct FfiTextResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub text: *mut u8,
    pub text_len: usize,
    pub cacheable: bool,
    /// Null when the response carried no `ETag`.
    pub etag: *mut c_char,
    pub ttl_ms: u64,
    pub soft_ttl_ms: u64,
}

impl FfiTextResult {
    /// Build a success result from a decoded response.
    pub(crate) fn ok(response: Response<String>) -> *mut Self {
        let (text, text_len) = leak_slice(response.result.into_bytes());
        let mut result = FfiTextResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            text,
            text_len,
            cacheable: false,
            etag: std::ptr::null_mut(),
            ttl_ms: 0,
            soft_ttl_ms: 0,
        };
        if let Some(entry) = response.cache_entry {
            result.apply_cache_entry(entry);
        }
        Box::into_raw(Box::new(result))
    }

    fn apply_cache_entry(&mut self, entry: CacheEntry) {
        self.cacheable = true;
        self.etag = entry.etag.map_or(std::ptr::null_mut(), to_c_string);
        self.ttl_ms = epoch_millis(entry.ttl);
        self.soft_ttl_ms = epoch_millis(entry.soft_ttl);
    }

    fn error(error_code: FfiErrorCode, msg: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiTextResult {
            error_code,
            error_message: to_c_string(msg.to_string()),
            text: std::ptr::null_mut(),
            text_len: 0,
            cacheable: false,
            etag: std::ptr::null_mut(),
            ttl_ms: 0,
            soft_ttl_ms: 0,
        }))
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }

    /// Build an error result for an argument that could not be read.
    pub(crate) fn invalid_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::InvalidArg, &format!("invalid argument: {name}"))
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, msg)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Hand ownership of `items` to C as pointer + length. Empty input yields null.
pub(crate) fn leak_slice<T>(items: Vec<T>) -> (*mut T, usize) {
    if items.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let len = items.len();
    (Box::into_raw(items.into_boxed_slice()) as *mut T, len)
}

/// Reclaim a slice produced by `leak_slice`. Safe with null.
pub(crate) fn reclaim_slice<T>(ptr: *mut T, len: usize) -> Vec<T> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) }.into_vec()
}

/// Convert to a C string, stripping at the first interior NUL.
pub(crate) fn to_c_string(s: String) -> *mut c_char {
    let s = match s.find('\0') {
        Some(nul) => s[..nul].to_string(),
        None => s,
    };
    CString::new(s).unwrap_or_default().into_raw()
}

/// Read a caller-owned C string. `None` for null or invalid UTF-8.
pub(crate) fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Read a caller-owned array of key-value pairs into a map.
///
/// Null with length 0 is an empty map. A null array with a non-zero length,
/// or any null or non-UTF-8 entry, yields `None`.
pub(crate) fn read_pairs(ptr: *const FfiKeyValue, len: usize) -> Option<Headers> {
    if len == 0 {
        return Some(Headers::new());
    }
    if ptr.is_null() {
        return None;
    }
    let pairs = unsafe { std::slice::from_raw_parts(ptr, len) };
    pairs
        .iter()
        .map(|pair| Some((read_str(pair.key)?.to_string(), read_str(pair.value)?.to_string())))
        .collect()
}

/// Read a caller-owned byte buffer. Null with length 0 is empty.
pub(crate) fn read_bytes(ptr: *const u8, len: usize) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
