//! Percent-encoding used for object paths, signed query strings and the
//! canonical request.
//!
//! Only the unreserved characters `A-Z a-z 0-9 - _ . ~` pass through
//! untouched; every other byte of the UTF-8 form is written as `%XX` with
//! uppercase hex.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Everything but the unreserved characters.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Like [QUERY] but leaves `/` alone so path segments stay separated.
const PATH: &AsciiSet = &QUERY.remove(b'/');

/// Encode a value for use inside a URL path, keeping `/` separators.
pub fn encode_path(value: &str) -> String {
    utf8_percent_encode(value, PATH).to_string()
}

/// Encode a value for use as a query key, query value or single path
/// component, so `/` becomes `%2F`.
pub fn encode_query(value: &str) -> String {
    utf8_percent_encode(value, QUERY).to_string()
}

/// Reverse either encoding. Sequences that do not form valid UTF-8 are
/// replaced with U+FFFD.
pub fn decode(value: &str) -> Cow<'_, str> {
    percent_decode_str(value).decode_utf8_lossy()
}
