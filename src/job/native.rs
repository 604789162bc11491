//! In-process backend: decode → geometry → encode
//!
//! The whole source is fetched into memory, decoded with the `image` crate
//! (HEIF first when the source looks like one), resized with
//! `fast_image_resize` and encoded per the requested format.

use async_trait::async_trait;
use fast_image_resize::{FilterType, Image, PixelType, ResizeAlg, Resizer};
use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageFormat, ImageOutputFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::num::NonZeroU32;
use std::path::Path;

use super::{JobError, SourceClient, SourceInfo, TransformExecutor};
use crate::constants::{DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH};
use crate::options::{Action, Gravity, TransformOptions};

/// Position vocabulary of the native backend
pub fn native_position(gravity: Gravity) -> &'static str {
    match gravity {
        Gravity::Nw => "northwest",
        Gravity::N => "north",
        Gravity::Ne => "northeast",
        Gravity::W => "west",
        Gravity::C => "center",
        Gravity::E => "east",
        Gravity::Sw => "southwest",
        Gravity::S => "south",
        Gravity::Se => "southeast",
    }
}

/// How the source is fitted into the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Preserve aspect, cover the box, cut the overflow at `position`
    Cover,
    /// Ignore aspect, force both dimensions
    Fill,
    /// Preserve aspect, fit within the box
    Inside,
}

/// Resize parameters handed to the native path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub position: Gravity,
}

impl ResizeParams {
    /// `None` for a pure format conversion
    pub fn from_options(options: &TransformOptions) -> Option<Self> {
        if options.is_convert_only() {
            return None;
        }

        let both = options.width().is_some() && options.height().is_some();
        let fit = match options.action() {
            Action::Crop if both => Fit::Cover,
            Action::Scale if both => Fit::Fill,
            _ => Fit::Inside,
        };

        Some(Self {
            width: options.width(),
            height: options.height(),
            fit,
            position: options.gravity(),
        })
    }

    /// Output size for a source of `src_w`×`src_h`
    pub fn target_size(&self, src_w: u32, src_h: u32) -> (u32, u32) {
        let (sw, sh) = (src_w as f64, src_h as f64);
        let size = match (self.width, self.height) {
            (Some(w), Some(h)) => match self.fit {
                Fit::Cover | Fit::Fill => (w, h),
                Fit::Inside => {
                    let scale = (w as f64 / sw).min(h as f64 / sh);
                    ((sw * scale).round() as u32, (sh * scale).round() as u32)
                }
            },
            (Some(w), None) => (w, (sh * w as f64 / sw).round() as u32),
            (None, Some(h)) => ((sw * h as f64 / sh).round() as u32, h),
            (None, None) => (src_w, src_h),
        };
        (size.0.max(1), size.1.max(1))
    }
}

/// Source region `(x, y, w, h)` with the target aspect ratio, anchored at `gravity`
pub fn cover_region(
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
    gravity: Gravity,
) -> (u32, u32, u32, u32) {
    let (sw, sh) = (src_w as u64, src_h as u64);
    let (tw, th) = (target_w.max(1) as u64, target_h.max(1) as u64);

    let (crop_w, crop_h) = if sw * th > sh * tw {
        // Source is wider than the target
        (((sh * tw + th / 2) / th).clamp(1, sw), sh)
    } else {
        (sw, ((sw * th + tw / 2) / tw).clamp(1, sh))
    };

    let (fx, fy) = anchor(gravity);
    let x = ((sw - crop_w) as f64 * fx).round() as u32;
    let y = ((sh - crop_h) as f64 * fy).round() as u32;
    (x, y, crop_w as u32, crop_h as u32)
}

fn anchor(gravity: Gravity) -> (f64, f64) {
    match gravity {
        Gravity::Nw => (0.0, 0.0),
        Gravity::N => (0.5, 0.0),
        Gravity::Ne => (1.0, 0.0),
        Gravity::W => (0.0, 0.5),
        Gravity::C => (0.5, 0.5),
        Gravity::E => (1.0, 0.5),
        Gravity::Sw => (0.0, 1.0),
        Gravity::S => (0.5, 1.0),
        Gravity::Se => (1.0, 1.0),
    }
}

/// Largest output the native backend renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

impl DimensionLimits {
    pub fn check(&self, width: u32, height: u32) -> Result<(), JobError> {
        if width > self.max_width || height > self.max_height {
            return Err(JobError::engine(format!(
                "requested size {}x{} exceeds the {}x{} limit",
                width, height, self.max_width, self.max_height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine {
    limits: DimensionLimits,
}

impl NativeEngine {
    pub fn new(limits: DimensionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> DimensionLimits {
        self.limits
    }
}

#[async_trait]
impl TransformExecutor for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn transform(
        &self,
        source: &SourceClient,
        options: &TransformOptions,
        info: &SourceInfo,
        destination: &Path,
    ) -> Result<(), JobError> {
        // Reject before fetching anything
        self.limits
            .check(options.width().unwrap_or(0), options.height().unwrap_or(0))?;

        let (data, fetched_type) = source.fetch_bytes(options.url()).await?;
        let content_type = fetched_type.or_else(|| info.content_type.clone());
        let heif = looks_like_heif(content_type.as_deref(), options.url());

        if let Some(params) = ResizeParams::from_options(options) {
            tracing::debug!(
                fit = ?params.fit,
                position = native_position(params.position),
                dimensions = %options.dimension_string(),
                "Native resize"
            );
        }

        let options = options.clone();
        let limits = self.limits;
        let encoded = tokio::task::spawn_blocking(move || render(&data, &options, heif, &limits))
            .await
            .map_err(|e| JobError::engine(format!("native worker failed: {}", e)))??;

        tokio::fs::write(destination, encoded)
            .await
            .map_err(|e| JobError::write_failure(e.to_string()))
    }
}

/// Content type or locator extension suggests the HEIF family
pub fn looks_like_heif(content_type: Option<&str>, url: &str) -> bool {
    let ct = content_type.unwrap_or("").to_lowercase();
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    ct.contains("heic") || ct.contains("heif") || path.ends_with(".heic") || path.ends_with(".heif")
}

/// Decode, transform and encode one image
pub fn render(
    data: &[u8],
    options: &TransformOptions,
    try_heif: bool,
    limits: &DimensionLimits,
) -> Result<Vec<u8>, JobError> {
    let img = decode(data, try_heif)?;
    let img = match ResizeParams::from_options(options) {
        Some(params) => apply_geometry(img, &params, limits)?,
        None => img,
    };
    encode(&img, options.format(), options.quality())
}

fn decode(data: &[u8], try_heif: bool) -> Result<DynamicImage, JobError> {
    if try_heif {
        match decode_heif(data) {
            Ok(img) => return Ok(img),
            Err(reason) => {
                tracing::debug!(reason = %reason, "HEIF decode failed, trying generic decoders");
            }
        }
    }

    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| JobError::engine(format!("Failed to decode image: {}", e)))?
        .decode()
        .map_err(|e| JobError::engine(format!("Failed to decode image: {}", e)))
}

#[cfg(feature = "heif")]
fn decode_heif(data: &[u8]) -> Result<DynamicImage, String> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(|e| e.to_string())?;
    let handle = ctx.primary_image_handle().map_err(|e| e.to_string())?;
    let image = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgba), None)
        .map_err(|e| e.to_string())?;

    let (width, height) = (image.width(), image.height());
    let planes = image.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| "decoded HEIF has no interleaved plane".to_string())?;

    let row_bytes = width as usize * 4;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_bytes]);
    }

    RgbaImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| "HEIF pixel buffer size mismatch".to_string())
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_data: &[u8]) -> Result<DynamicImage, String> {
    Err("built without the heif feature".to_string())
}

fn apply_geometry(
    img: DynamicImage,
    params: &ResizeParams,
    limits: &DimensionLimits,
) -> Result<DynamicImage, JobError> {
    let (target_w, target_h) = params.target_size(img.width(), img.height());
    // A single given dimension can still blow up the other one on extreme aspect ratios
    limits.check(target_w, target_h)?;

    let img = if params.fit == Fit::Cover {
        let (x, y, w, h) = cover_region(img.width(), img.height(), target_w, target_h, params.position);
        img.crop_imm(x, y, w, h)
    } else {
        img
    };

    if img.width() == target_w && img.height() == target_h {
        return Ok(img);
    }
    resize_exact(&img, target_w, target_h)
}

/// Lanczos3 resize to an exact size
fn resize_exact(img: &DynamicImage, target_w: u32, target_h: u32) -> Result<DynamicImage, JobError> {
    let resize_err = |msg: String| JobError::engine(format!("Resize failed: {}", msg));

    let src_width = NonZeroU32::new(img.width()).ok_or_else(|| resize_err("source width is 0".into()))?;
    let src_height = NonZeroU32::new(img.height()).ok_or_else(|| resize_err("source height is 0".into()))?;
    let dst_width = NonZeroU32::new(target_w).ok_or_else(|| resize_err("target width is 0".into()))?;
    let dst_height = NonZeroU32::new(target_h).ok_or_else(|| resize_err("target height is 0".into()))?;

    let src_image = Image::from_vec_u8(
        src_width,
        src_height,
        img.to_rgba8().into_raw(),
        PixelType::U8x4,
    )
    .map_err(|e| resize_err(format!("{:?}", e)))?;

    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);
    let mut resizer = Resizer::new(ResizeAlg::Convolution(FilterType::Lanczos3));
    resizer
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .map_err(|e| resize_err(format!("{:?}", e)))?;

    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| resize_err("output buffer size mismatch".into()))
}

fn encode(img: &DynamicImage, format: &str, quality: u8) -> Result<Vec<u8>, JobError> {
    use image::ImageEncoder as _;

    let encode_err = |e: &dyn std::fmt::Display| {
        JobError::engine(format!("Failed to encode to {}: {}", format, e))
    };
    let (width, height) = (img.width(), img.height());
    let mut output = Cursor::new(Vec::new());

    match format {
        "jpg" | "jpeg" => {
            let rgb = flatten_on_white(&img.to_rgba8());
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), width, height, image::ColorType::Rgb8)
                .map_err(|e| encode_err(&e))?;
        }
        "png" => {
            image::codecs::png::PngEncoder::new(&mut output)
                .write_image(&img.to_rgba8(), width, height, image::ColorType::Rgba8)
                .map_err(|e| encode_err(&e))?;
        }
        "webp" => {
            // The image crate only encodes lossless WebP
            image::codecs::webp::WebPEncoder::new_lossless(&mut output)
                .write_image(&img.to_rgba8(), width, height, image::ColorType::Rgba8)
                .map_err(|e| encode_err(&e))?;
        }
        "gif" => {
            image::codecs::gif::GifEncoder::new(&mut output)
                .encode(&img.to_rgba8(), width, height, image::ColorType::Rgba8)
                .map_err(|e| encode_err(&e))?;
        }
        "avif" => return encode_avif(img, quality).map_err(|e| encode_err(&e)),
        other => {
            let image_format = ImageFormat::from_extension(other)
                .ok_or_else(|| encode_err(&"unsupported output format"))?;
            img.write_to(&mut output, ImageOutputFormat::from(image_format))
                .map_err(|e| encode_err(&e))?;
        }
    }

    Ok(output.into_inner())
}

fn encode_avif(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ravif::Error> {
    use rgb::FromSlice;

    let rgba = img.to_rgba8();
    let pixels = imgref::Img::new(
        rgba.as_raw().as_rgba(),
        rgba.width() as usize,
        rgba.height() as usize,
    );

    let encoded = ravif::Encoder::new()
        .with_quality(quality.max(1) as f32)
        .with_speed(6)
        .encode_rgba(pixels)?;
    Ok(encoded.avif_file)
}

/// Composite onto white and drop alpha
fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}
