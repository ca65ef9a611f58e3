//! Error types for text requests.
//!
//! # Design
//! Transport failures and non-2xx statuses are produced by the dispatcher and
//! handed to the request's listener untouched. `UnsupportedCharset` is the
//! only error the core raises itself, and only from explicit-result APIs:
//! the body and decode paths recover from it locally.

/// Errors delivered to a request listener or returned by fallible setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A charset label is unknown or cannot be used for encoding.
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
}
