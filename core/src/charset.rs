//! Charset resolution and response body decoding.
//!
//! # Design
//! The resolver is a plain value rather than process-wide state: the label
//! used when a response declares no charset and the encoding used when
//! strict decoding fails are both fields, so callers (and tests) pick them
//! explicitly. Labels are resolved with `encoding_rs`, with two exceptions
//! where HTTP clients and the WHATWG Encoding Standard disagree:
//! - ISO-8859-1 labels decode as true Latin-1 (every byte to the code point
//!   of the same value), not windows-1252.
//! - A bare `UTF-16` label without a byte-order mark is big-endian.
//!
//! Byte-order marks are only honored for Unicode labels.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use serde::Deserialize;

use crate::error::RequestError;
use crate::http::{header, Headers};

/// Charset assumed when a response does not declare one (HTTP/1.1 default).
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

/// Name reported for true Latin-1 decoding.
const LATIN_1: &str = "ISO-8859-1";

const LATIN_1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "iso_8859-1:1987",
    "iso8859_1",
    "iso_8859_1",
    "8859_1",
    "latin1",
    "l1",
    "iso-ir-100",
    "ibm819",
    "ibm-819",
    "cp819",
    "819",
    "csisolatin1",
];

/// Labels naming UTF-16 without a byte order.
const UNMARKED_UTF_16_LABELS: &[&str] = &["utf-16", "unicode"];

/// Serializable resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CharsetConfig {
    #[serde(default = "default_charset")]
    pub default_charset: String,
    #[serde(default = "fallback_charset")]
    pub fallback_charset: String,
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn fallback_charset() -> String {
    "utf-8".to_string()
}

impl Default for CharsetConfig {
    fn default() -> Self {
        Self {
            default_charset: default_charset(),
            fallback_charset: fallback_charset(),
        }
    }
}

/// Text produced by `CharsetResolver::decode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Name of the charset that actually produced `text`.
    pub charset: &'static str,
    /// True when the declared charset could not be used.
    pub used_fallback: bool,
}

/// Picks the charset for a response and turns its body into text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetResolver {
    default_charset: String,
    fallback: &'static Encoding,
}

impl Default for CharsetResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CHARSET, UTF_8)
    }
}

impl CharsetResolver {
    pub fn new(default_charset: impl Into<String>, fallback: &'static Encoding) -> Self {
        Self {
            default_charset: default_charset.into(),
            fallback,
        }
    }

    /// Build a resolver from settings. The fallback must be a known label;
    /// the default charset is only a label and is checked at decode time.
    pub fn from_config(config: &CharsetConfig) -> Result<Self, RequestError> {
        let fallback = Encoding::for_label(config.fallback_charset.as_bytes())
            .ok_or_else(|| RequestError::UnsupportedCharset(config.fallback_charset.clone()))?;
        Ok(Self::new(config.default_charset.clone(), fallback))
    }

    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    pub fn fallback(&self) -> &'static Encoding {
        self.fallback
    }

    /// Return the `charset` parameter of the `Content-Type` header, or the
    /// default charset when the header or the parameter is missing.
    pub fn resolve_charset(&self, headers: &Headers) -> String {
        header(headers, "Content-Type")
            .and_then(charset_param)
            .unwrap_or(self.default_charset.as_str())
            .to_string()
    }

    /// Decode `body` with the charset advertised in `headers`.
    ///
    /// For a Unicode label a byte-order mark takes precedence over it.
    /// Decoding is strict; an unknown label or a malformed byte sequence
    /// falls back to a lossy decode with the fallback encoding, which cannot
    /// fail.
    pub fn decode(&self, headers: &Headers, body: &[u8]) -> Decoded {
        let label = self.resolve_charset(headers);
        match strict_decode(&label, body) {
            Some((text, charset)) => Decoded {
                text,
                charset,
                used_fallback: false,
            },
            None => {
                tracing::warn!(
                    charset = %label,
                    fallback = self.fallback.name(),
                    "response body not decodable with declared charset, using fallback"
                );
                let (text, _) = self.fallback.decode_with_bom_removal(body);
                Decoded {
                    text: text.into_owned(),
                    charset: self.fallback.name(),
                    used_fallback: true,
                }
            }
        }
    }
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then_some(value)
    })
}

fn is_label_in(label: &str, labels: &[&str]) -> bool {
    let label = label.trim();
    labels.iter().any(|known| label.eq_ignore_ascii_case(known))
}

fn strict_decode(label: &str, body: &[u8]) -> Option<(String, &'static str)> {
    if is_label_in(label, LATIN_1_LABELS) {
        return Some((body.iter().map(|&b| char::from(b)).collect(), LATIN_1));
    }
    let declared = Encoding::for_label(label.as_bytes())?;
    let (encoding, bom_len) = if [UTF_8, UTF_16LE, UTF_16BE].contains(&declared) {
        let unmarked = if is_label_in(label, UNMARKED_UTF_16_LABELS) {
            UTF_16BE
        } else {
            declared
        };
        Encoding::for_bom(body).unwrap_or((unmarked, 0))
    } else {
        (declared, 0)
    };
    let text = encoding.decode_without_bom_handling_and_without_replacement(&body[bom_len..])?;
    Some((text.into_owned(), encoding.name()))
}
