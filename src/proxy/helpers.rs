//! Proxy utility functions.
//!
//! Response header values derived from the cache file and the clock.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Content-Type for a cache file, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

/// Format a timestamp as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

/// `Expires` value `offset_secs` from `now`.
pub fn expires_header(now: DateTime<Utc>, offset_secs: u64) -> String {
    let offset = i64::try_from(offset_secs).unwrap_or(i64::MAX);
    let expires = now
        .checked_add_signed(Duration::seconds(offset.min(i64::MAX / 1000)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    http_date(expires)
}

pub fn cache_control_header(max_age_secs: u64) -> String {
    format!("public, max-age={}", max_age_secs)
}

/// Job statuses that are not valid HTTP codes are reported as 500.
pub fn boundary_status(status: u16) -> u16 {
    if (100..=599).contains(&status) {
        status
    } else {
        500
    }
}
