//! Transform option model
//!
//! A [`TransformOptions`] value is the normalized description of one
//! transform request. It is produced by one of the two decoders:
//!
//! ## Legacy path encoding
//! ```text
//! /c200x200n/jpg,75/http://example.com/image.jpg
//! ```
//!
//! ## Query parameters (blob storage)
//! ```text
//! /media/photos/path/image.jpg?s=300x300&f=webp&g=n&m=crop&q=90
//! ```
//!
//! Once built, options are read-only: the command builder, the cache and the
//! job orchestrator only borrow them.

pub mod legacy;
pub mod query;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::constants::{DEFAULT_QUALITY, STDIO_SENTINEL};

pub use legacy::{build_query_string, decode_legacy_path, repair_protocol, DecodeError};
pub use query::{decode_query_params, resolve_blob_url};

/// Geometric action requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Crop,
    #[default]
    Resize,
    Scale,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Resize => "resize",
            Self::Scale => "scale",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compass anchor used when cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    Nw,
    N,
    Ne,
    W,
    #[default]
    C,
    E,
    Sw,
    S,
    Se,
}

impl Gravity {
    pub const ALL: [Gravity; 9] = [
        Gravity::Nw,
        Gravity::N,
        Gravity::Ne,
        Gravity::W,
        Gravity::C,
        Gravity::E,
        Gravity::Sw,
        Gravity::S,
        Gravity::Se,
    ];

    /// Short compass code as it appears in URLs
    pub fn code(&self) -> &'static str {
        match self {
            Self::Nw => "nw",
            Self::N => "n",
            Self::Ne => "ne",
            Self::W => "w",
            Self::C => "c",
            Self::E => "e",
            Self::Sw => "sw",
            Self::S => "s",
            Self::Se => "se",
        }
    }

    /// Lenient parse: unknown or empty input falls back to center
    pub fn from_code_or_default(code: &str) -> Self {
        code.parse().unwrap_or_default()
    }
}

impl FromStr for Gravity {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gravity::ALL
            .into_iter()
            .find(|g| g.code() == s.to_lowercase())
            .ok_or_else(|| OptionsError::UnknownGravity(s.to_string()))
    }
}

/// Errors raised while building [`TransformOptions`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{action} requires both width and height")]
    IncompleteGeometry { action: Action },

    #[error("unknown gravity: {0}")]
    UnknownGravity(String),

    #[error("missing source locator")]
    MissingSource,
}

/// Normalized, validated description of a single transform request.
///
/// Field names follow the serialized form used for the cache fingerprint, so
/// renaming a field invalidates every existing cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformOptions {
    action: Action,
    width: Option<u32>,
    height: Option<u32>,
    gravity: Gravity,
    format: String,
    quality: u8,
    imagefile: String,
    url: String,
    suffix: String,
}

impl TransformOptions {
    pub fn builder() -> TransformOptionsBuilder {
        TransformOptionsBuilder::default()
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn gravity(&self) -> Gravity {
        self.gravity
    }

    /// Output format token (e.g. `jpg`, `webp`)
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// The resolvable address of the source image
    pub fn imagefile(&self) -> &str {
        &self.imagefile
    }

    /// Source locator plus pass-through query string; this is what gets fetched
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Extension of the source locator, including the leading dot
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// True when no geometric transform was requested
    pub fn is_convert_only(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }

    /// `"{width}x{height}"` with an empty string for an absent side
    pub fn dimension_string(&self) -> String {
        format!(
            "{}x{}",
            self.width.map(|w| w.to_string()).unwrap_or_default(),
            self.height.map(|h| h.to_string()).unwrap_or_default()
        )
    }
}

/// Builder for [`TransformOptions`]
///
/// `build()` enforces the constructor preconditions: `crop` and `scale` need
/// both dimensions, and a source locator must be present.
#[derive(Debug, Clone, Default)]
pub struct TransformOptionsBuilder {
    action: Action,
    width: Option<u32>,
    height: Option<u32>,
    gravity: Gravity,
    format: String,
    quality: Option<u8>,
    imagefile: String,
    url: Option<String>,
    suffix: String,
}

impl TransformOptionsBuilder {
    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: Option<u32>) -> Self {
        self.height = height;
        self
    }

    pub fn gravity(mut self, gravity: Gravity) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality.min(100));
        self
    }

    pub fn imagefile(mut self, imagefile: impl Into<String>) -> Self {
        self.imagefile = imagefile.into();
        self
    }

    /// Defaults to `imagefile` when not set
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn build(self) -> Result<TransformOptions, OptionsError> {
        if matches!(self.action, Action::Crop | Action::Scale)
            && (self.width.is_none() || self.height.is_none())
        {
            return Err(OptionsError::IncompleteGeometry {
                action: self.action,
            });
        }
        if self.imagefile.is_empty() {
            return Err(OptionsError::MissingSource);
        }

        let url = self.url.unwrap_or_else(|| self.imagefile.clone());
        Ok(TransformOptions {
            action: self.action,
            width: self.width,
            height: self.height,
            gravity: self.gravity,
            format: self.format,
            quality: self.quality.unwrap_or(DEFAULT_QUALITY),
            imagefile: self.imagefile,
            url,
            suffix: self.suffix,
        })
    }
}

/// Where the raster engine reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTargets {
    pub source: String,
    pub sink: String,
}

impl FileTargets {
    /// stdin → stdout, used by the streaming pipeline
    pub fn stdio() -> Self {
        Self {
            source: STDIO_SENTINEL.to_string(),
            sink: STDIO_SENTINEL.to_string(),
        }
    }

    pub fn sink_is_stdout(&self) -> bool {
        self.sink == STDIO_SENTINEL
    }
}

/// Clamp a textual quality value into `0..=100`.
///
/// Mirrors integer-prefix parsing: an optional sign followed by digits, with
/// anything after the digits ignored. Missing or unparsable input yields the
/// default of 80.
pub fn clamp_quality(raw: &str) -> u8 {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return DEFAULT_QUALITY;
    }
    if negative {
        return 0;
    }

    // Too many digits to fit still means "above 100"
    rest[..digits_len]
        .parse::<u64>()
        .map(|q| q.min(100) as u8)
        .unwrap_or(100)
}

/// Filename extension of a locator, including the dot; empty when none.
///
/// Only the last path segment is considered and a leading dot does not
/// count as an extension (`/x/.hidden` has none).
pub fn extension_of(locator: &str) -> String {
    let last_segment = locator.rsplit('/').next().unwrap_or(locator);
    match last_segment.rfind('.') {
        Some(idx) if idx > 0 => last_segment[idx..].to_string(),
        _ => String::new(),
    }
}
