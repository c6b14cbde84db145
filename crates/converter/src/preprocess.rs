//! Image pre-compression.
//!
//! Downsamples a selected image to bounded, even dimensions and re-encodes it as
//! JPEG at a fixed quality before it is staged for encoding. Smaller inputs keep
//! the encoder fast and well within its memory budget.

use crate::asset::{replace_extension, ImageAsset};
use crate::config::PreprocessConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use thiserror::Error;

/// Extension given to every preprocessed image.
pub const COMPRESSED_EXTENSION: &str = "jpg";

/// Error type for image preprocessing
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The bytes are not a decodable raster image
    #[error("Failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// Re-encoding failed or the target size is degenerate
    #[error("Failed to encode image: {0}")]
    ImageEncode(String),
}

/// Bounds and quality applied by the preprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self::from(&PreprocessConfig::default())
    }
}

impl From<&PreprocessConfig> for PreprocessOptions {
    fn from(cfg: &PreprocessConfig) -> Self {
        Self {
            max_width: cfg.max_width,
            max_height: cfg.max_height,
            quality: cfg.quality,
        }
    }
}

fn floor_even(v: u64) -> u32 {
    ((v / 2) * 2) as u32
}

/// Compute the output size for an image of `width` x `height`.
///
/// Scales down uniformly by `min(max_width/width, max_height/height)` when either
/// side is out of bounds (never up), then floors both sides to a multiple of 2.
/// Integer arithmetic keeps the bounded side exact.
pub fn target_dimensions(width: u32, height: u32, opts: &PreprocessOptions) -> (u32, u32) {
    let (w, h) = (width as u64, height as u64);
    let (max_w, max_h) = (opts.max_width as u64, opts.max_height as u64);

    if w == 0 || h == 0 || max_w == 0 || max_h == 0 {
        return (0, 0);
    }

    let (scaled_w, scaled_h) = if w > max_w || h > max_h {
        // max_w / w <= max_h / h means width is the binding side
        if max_w * h <= max_h * w {
            (max_w, h * max_w / w)
        } else {
            (w * max_h / h, max_h)
        }
    } else {
        (w, h)
    };

    (floor_even(scaled_w), floor_even(scaled_h))
}

/// Decode `bytes` and rotate the pixels upright per the EXIF orientation.
///
/// The re-encoded JPEG carries no EXIF block, so the rotation has to be baked in.
fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Decode, downscale and re-encode `asset` as JPEG.
///
/// Bounds apply to the upright image. The returned asset carries its new
/// dimensions and a `.jpg` file name.
pub fn compress_image(
    asset: &ImageAsset,
    opts: &PreprocessOptions,
) -> Result<ImageAsset, PreprocessError> {
    let img = decode_upright(&asset.bytes).map_err(PreprocessError::ImageDecode)?;
    let (src_w, src_h) = (img.width(), img.height());

    let (width, height) = target_dimensions(src_w, src_h, opts);
    if width == 0 || height == 0 {
        return Err(PreprocessError::ImageEncode(format!(
            "{}x{} image collapses to {}x{}",
            src_w, src_h, width, height
        )));
    }

    let resized = if (width, height) == (src_w, src_h) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    // JPEG carries no alpha channel
    let rgb = resized.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, opts.quality)
        .encode_image(&rgb)
        .map_err(|e| PreprocessError::ImageEncode(e.to_string()))?;

    tracing::debug!(
        file = %asset.file_name,
        from = %format!("{}x{}", src_w, src_h),
        to = %format!("{}x{}", width, height),
        bytes_before = asset.len(),
        bytes_after = buf.len(),
        "compressed image"
    );

    Ok(ImageAsset {
        file_name: replace_extension(&asset.file_name, COMPRESSED_EXTENSION),
        bytes: buf.into(),
        dimensions: Some((width, height)),
    })
}

/// Compress `asset`, falling back to the unmodified original on any failure.
pub fn compress_or_original(asset: &ImageAsset, opts: &PreprocessOptions) -> ImageAsset {
    match compress_image(asset, opts) {
        Ok(compressed) => compressed,
        Err(e) => {
            tracing::warn!(file = %asset.file_name, error = %e, "image compression failed, using original");
            asset.clone()
        }
    }
}
