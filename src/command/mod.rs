//! Transform command builder
//!
//! Turns [`TransformOptions`] into one of four command variants and renders
//! the positional argument list for the external raster engine:
//!
//! ```text
//! [engine, source, geometry.., +repage, -quality, Q, -background, white, -flatten, sink]
//! ```
//!
//! Variant selection order: convert-only, crop, scale, resize.

use crate::options::{Action, FileTargets, Gravity, TransformOptions};

/// Engine-side gravity names, indexed by compass code
static GRAVITY_NAMES: [(Gravity, &str); 9] = [
    (Gravity::Nw, "NorthWest"),
    (Gravity::N, "North"),
    (Gravity::Ne, "NorthEast"),
    (Gravity::W, "West"),
    (Gravity::C, "Center"),
    (Gravity::E, "East"),
    (Gravity::Sw, "SouthWest"),
    (Gravity::S, "South"),
    (Gravity::Se, "SouthEast"),
];

/// Compass name understood by the external engine (`Center`, `NorthWest`, ...)
pub fn engine_gravity_name(gravity: Gravity) -> &'static str {
    GRAVITY_NAMES
        .iter()
        .find(|(g, _)| *g == gravity)
        .map(|(_, name)| *name)
        .unwrap_or("Center")
}

/// Geometric step of an engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformCommand {
    /// No geometry; format and quality normalization only
    ConvertOnly,
    /// Shrink to cover the box, then cut it at the gravity anchor
    Crop { dimensions: String, gravity: Gravity },
    /// Force both dimensions, ignoring aspect ratio
    Scale { dimensions: String },
    /// Fit the given dimension, preserving aspect ratio
    Resize { dimensions: String },
}

impl TransformCommand {
    pub fn select(options: &TransformOptions) -> Self {
        if options.is_convert_only() {
            return Self::ConvertOnly;
        }

        let dimensions = options.dimension_string();
        if options.action() == Action::Crop {
            Self::Crop {
                dimensions,
                gravity: options.gravity(),
            }
        } else if options.width().is_some() && options.height().is_some() {
            Self::Scale { dimensions }
        } else {
            Self::Resize { dimensions }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConvertOnly => "convert",
            Self::Crop { .. } => "crop",
            Self::Scale { .. } => "scale",
            Self::Resize { .. } => "resize",
        }
    }

    /// Engine arguments for the geometric step alone
    pub fn action_args(&self) -> Vec<String> {
        match self {
            Self::ConvertOnly => Vec::new(),
            Self::Crop {
                dimensions,
                gravity,
            } => vec![
                "-thumbnail".to_string(),
                format!("{}^>", dimensions),
                "-gravity".to_string(),
                engine_gravity_name(*gravity).to_string(),
                "-crop".to_string(),
                format!("{}+0+0", dimensions),
            ],
            Self::Scale { dimensions } => vec!["-scale".to_string(), dimensions.clone()],
            Self::Resize { dimensions } => vec!["-resize".to_string(), dimensions.clone()],
        }
    }
}

/// Full argument list, `argv[0]` being the engine name.
pub fn build_args(options: &TransformOptions, targets: &FileTargets, engine: &str) -> Vec<String> {
    let command = TransformCommand::select(options);

    let mut args = vec![engine.to_string(), targets.source.clone()];
    args.extend(command.action_args());
    args.extend([
        "+repage".to_string(),
        "-quality".to_string(),
        options.quality().to_string(),
        "-background".to_string(),
        "white".to_string(),
        "-flatten".to_string(),
    ]);

    if targets.sink_is_stdout() {
        args.push(format!("{}:-", options.format()));
    } else {
        args.push(targets.sink.clone());
    }

    args
}
