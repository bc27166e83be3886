//! Cache validation helpers for static responses.
//!
//! Validation state is derived on demand from a file's modification time, size
//! and name; nothing here is cached across requests.
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};
use hyper::{HeaderMap, Method, header};
use sha1::{Digest, Sha1};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Build the opaque (unquoted) ETag for a file.
pub fn generate_etag(mtime: SystemTime, size: u64, filename: &str) -> String {
    let digest = Sha1::digest(filename.as_bytes());
    let name_hash: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "devgate-{}-{}-{}",
        DateTime::<Utc>::from(mtime).timestamp(),
        size,
        name_hash
    )
}

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format(HTTP_DATE_FORMAT)
        .to_string()
}

/// Parse an HTTP date header value, accepting IMF-fixdate and RFC 2822 forms.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc2822(value).map(|dt| dt.with_timezone(&Utc)))
        .ok()
}

/// Weak comparison of `etag` against an `If-None-Match` value.
///
/// Handles `*`, comma separated lists, quoting and `W/` prefixes.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let etag = strip_etag(etag);
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || strip_etag(candidate) == etag
    })
}

fn strip_etag(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Decide whether the client's cached copy is stale.
///
/// Only `GET` and `HEAD` are conditional. `If-None-Match` takes precedence over
/// `If-Modified-Since`; the latter is compared at second resolution because
/// HTTP dates carry no sub-second part.
pub fn is_resource_modified(
    method: &Method,
    headers: &HeaderMap,
    etag: &str,
    last_modified: SystemTime,
) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return true;
    }

    let mut unmodified = false;

    if let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
    {
        unmodified = DateTime::<Utc>::from(last_modified).timestamp() <= since.timestamp();
    }

    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        unmodified = etag_matches(if_none_match, etag);
    }

    !unmodified
}
