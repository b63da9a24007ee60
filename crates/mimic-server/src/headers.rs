//! Header application for outgoing responses.
//!
//! Header keys must be RFC 7230 tokens; entries with any other character are
//! skipped rather than rejected. Values are templates rendered against the
//! request, and a later entry for the same key replaces an earlier one.

use crate::config::HeaderEntry;
use crate::template::{renderer, RequestContext, TemplateError};
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use tracing::debug;

/// `tchar` from RFC 7230 section 3.2.6.
fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

pub fn is_valid_header_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(is_token_char)
}

/// Render and insert `entries` into `headers`.
///
/// Invalid keys and values that cannot be carried in a header are skipped; a
/// template failure aborts the whole application.
pub fn apply_headers(
    headers: &mut HeaderMap,
    entries: &[HeaderEntry],
    request: &RequestContext,
) -> Result<(), TemplateError> {
    for entry in entries {
        if !is_valid_header_key(&entry.key) {
            debug!("Skipping header with invalid key {:?}", entry.key);
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(entry.key.as_bytes()) else {
            continue;
        };
        let value = renderer().render(&entry.value, request)?;
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => debug!("Skipping header {} with invalid value", entry.key),
        }
    }
    Ok(())
}

/// Apply environment headers, then route headers; route values win on key
/// collision.
pub fn apply_layered_headers(
    headers: &mut HeaderMap,
    environment: &[HeaderEntry],
    route: &[HeaderEntry],
    request: &RequestContext,
) -> Result<(), TemplateError> {
    apply_headers(headers, environment, request)?;
    apply_headers(headers, route, request)
}
