//! Query-parameter decoder used by the blob-storage endpoint
//!
//! Supported parameters:
//! - `s`: size token (`300x300`, `c300x300`, `w300`, `h300`, or `300`)
//! - `m`: mode override (`crop` or `scale`)
//! - `f`: output format (default `png`)
//! - `g`: crop gravity (default `c`)
//! - `q`: quality 0-100 (default 80)
//!
//! Malformed values never fail the request; they degrade to defaults.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{clamp_quality, extension_of, Action, Gravity, OptionsError, TransformOptions};
use crate::constants::DEFAULT_QUERY_FORMAT;

static BOX_PATTERN: OnceLock<Regex> = OnceLock::new();
static SINGLE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn box_pattern() -> &'static Regex {
    BOX_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^c?(\d+)x(\d+)$").expect("Invalid size regex - this is a compile-time bug")
    })
}

fn single_pattern() -> &'static Regex {
    SINGLE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^([wh])?(\d+)$").expect("Invalid size regex - this is a compile-time bug")
    })
}

/// Geometry implied by the `s` token before any mode override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SizeToken {
    action: Action,
    width: Option<u32>,
    height: Option<u32>,
}

impl SizeToken {
    fn none() -> Self {
        Self {
            action: Action::Resize,
            width: None,
            height: None,
        }
    }

    fn parse(raw: &str, mode: &str) -> Self {
        if let Some(caps) = box_pattern().captures(raw) {
            let width = caps[1].parse().ok();
            let height = caps[2].parse().ok();
            // Only a lowercase prefix is an explicit crop
            let action = if raw.starts_with('c') || mode == "crop" {
                Action::Crop
            } else {
                Action::Scale
            };
            return Self {
                action,
                width,
                height,
            };
        }

        if let Some(caps) = single_pattern().captures(raw) {
            let value = caps[2].parse().ok();
            let is_height = caps
                .get(1)
                .map(|m| m.as_str().eq_ignore_ascii_case("h"))
                .unwrap_or(false);
            return Self {
                action: Action::Resize,
                width: if is_height { None } else { value },
                height: if is_height { value } else { None },
            };
        }

        Self::none()
    }
}

/// Decode blob-storage query parameters into [`TransformOptions`].
///
/// `full_url` is the fully-qualified source address (see [`resolve_blob_url`])
/// and `image_path` the trailing path segment used for the cache suffix.
/// Query values never cause an error; only an empty `full_url` does.
pub fn decode_query_params(
    query: &BTreeMap<String, String>,
    full_url: &str,
    image_path: &str,
) -> Result<TransformOptions, OptionsError> {
    let param = |key: &str| query.get(key).map(String::as_str).unwrap_or("");

    let mode = param("m").to_lowercase();
    let mut size = match param("s") {
        "" => SizeToken::none(),
        raw => SizeToken::parse(raw, &mode),
    };

    match mode.as_str() {
        "crop" => size.action = Action::Crop,
        "scale" => size.action = Action::Scale,
        _ => {}
    }

    // Crop and scale need a full box; anything less falls back to a plain resize
    if size.width.is_none() || size.height.is_none() {
        size.action = Action::Resize;
    }

    let format = sanitize_format(param("f"));
    let gravity = Gravity::from_code_or_default(param("g"));
    let quality = clamp_quality(param("q"));

    TransformOptions::builder()
        .action(size.action)
        .width(size.width)
        .height(size.height)
        .gravity(gravity)
        .format(format)
        .quality(quality)
        .imagefile(full_url)
        .url(full_url)
        .suffix(extension_of(image_path))
        .build()
}

/// Lowercase the format token and strip anything that is not ASCII
/// alphanumeric, so it is safe to use as a cache filename extension.
fn sanitize_format(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase();

    if cleaned.is_empty() {
        DEFAULT_QUERY_FORMAT.to_string()
    } else {
        cleaned
    }
}

/// Join a blob-storage base URL and an image path.
///
/// A base without an `http://` or `https://` scheme gets `https://`.
pub fn resolve_blob_url(base: &str, image_path: &str) -> String {
    let scheme = if base.starts_with("http://") || base.starts_with("https://") {
        ""
    } else {
        "https://"
    };
    format!("{}{}/{}", scheme, base, image_path)
}
