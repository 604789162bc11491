//! Legacy compact-URL decoder
//!
//! Grammar (all groups optional except the trailing locator):
//!
//! ```text
//! [/] [c|w|h]? DIGITS [x DIGITS]? [,]? [gravity]? [/]? [png|jpg]? [,]? DIGITS? / LOCATOR
//! ```
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use resize_server::options::{decode_legacy_path, Action};
//!
//! let opts = decode_legacy_path(
//!     "/c200x200n/jpg,75/http://host/img.jpg",
//!     &BTreeMap::new(),
//! ).unwrap();
//! assert_eq!(opts.action(), Action::Crop);
//! assert_eq!(opts.quality(), 75);
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

use super::{clamp_quality, extension_of, Action, Gravity, TransformOptions};
use crate::constants::DEFAULT_LEGACY_FORMAT;

static LEGACY_PATTERN: OnceLock<Regex> = OnceLock::new();
static PROTOCOL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn legacy_pattern() -> &'static Regex {
    LEGACY_PATTERN.get_or_init(|| {
        // Constant pattern; covered by test_legacy_pattern_is_valid
        Regex::new(concat!(
            r"^/?(c|w|h)?([0-9]+)x?([0-9]+)?,?",
            r"(c|e|w|n(?:e|w)?|s(?:e|w)?)?",
            r"/?(png|jpg)?,?([0-9]+)?",
            r"/(.*)$",
        ))
        .expect("Invalid legacy URL regex - this is a compile-time bug")
    })
}

fn protocol_pattern() -> &'static Regex {
    PROTOCOL_PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z]+:)/+([^/])")
            .expect("Invalid protocol regex - this is a compile-time bug")
    })
}

/// Errors from the legacy decoder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The path does not follow the compact encoding
    #[error("Invalid request format: {0}")]
    InvalidFormat(String),
}

impl DecodeError {
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::InvalidFormat(_) => 400,
        }
    }
}

/// Normalize the slashes after a URL scheme to exactly two.
///
/// `http:/example.com` and `http:///example.com` both become
/// `http://example.com`. Well-formed URLs are returned unchanged.
pub fn repair_protocol(locator: &str) -> String {
    protocol_pattern().replace(locator, "$1//$2").into_owned()
}

/// Render a query mapping as `?k=v&...`, or an empty string for no pairs.
///
/// Keys and values are percent-encoded; pairs follow the map's key order.
pub fn build_query_string(query: &BTreeMap<String, String>) -> String {
    if query.is_empty() {
        return String::new();
    }

    let pairs: Vec<String> = query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect();

    format!("?{}", pairs.join("&"))
}

/// Decode a legacy compact path plus its query mapping.
///
/// Fails with [`DecodeError::InvalidFormat`] when the grammar does not match
/// or when the decoded geometry is not a valid option set (e.g. a crop with
/// only one dimension).
pub fn decode_legacy_path(
    path: &str,
    query: &BTreeMap<String, String>,
) -> Result<TransformOptions, DecodeError> {
    let caps = legacy_pattern()
        .captures(path)
        .ok_or_else(|| DecodeError::InvalidFormat(path.to_string()))?;

    let mode = caps.get(1).map(|m| m.as_str());
    let first = parse_dimension(caps.get(2).map(|m| m.as_str()))?;
    let second = parse_dimension(caps.get(3).map(|m| m.as_str()))?;

    let (width, height) = match mode {
        Some("w") => (first, None),
        Some("h") => (None, first),
        _ => (first, second),
    };

    let action = if mode == Some("c") {
        Action::Crop
    } else {
        Action::Resize
    };

    let gravity = caps
        .get(4)
        .map(|m| Gravity::from_code_or_default(m.as_str()))
        .unwrap_or_default();

    let format = caps
        .get(5)
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_LEGACY_FORMAT);

    let quality = clamp_quality(caps.get(6).map(|m| m.as_str()).unwrap_or(""));

    let locator = repair_protocol(caps.get(7).map(|m| m.as_str()).unwrap_or(""));
    let suffix = extension_of(&locator);
    let url = format!("{}{}", locator, build_query_string(query));

    TransformOptions::builder()
        .action(action)
        .width(width)
        .height(height)
        .gravity(gravity)
        .format(format)
        .quality(quality)
        .imagefile(locator)
        .url(url)
        .suffix(suffix)
        .build()
        .map_err(|e| DecodeError::InvalidFormat(e.to_string()))
}

fn parse_dimension(raw: Option<&str>) -> Result<Option<u32>, DecodeError> {
    raw.map(|digits| {
        digits
            .parse::<u32>()
            .map_err(|_| DecodeError::InvalidFormat(format!("dimension out of range: {}", digits)))
    })
    .transpose()
}
