//! Brings captured or uploaded images into the canonical encoded form.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use curio_contracts::image::{EncodedImage, InvalidImageError, DEFAULT_MEDIA_TYPE};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use tracing::debug;

pub const DEFAULT_MAX_DIM: u32 = 1024;
const MIN_MAX_DIM: u32 = 128;
const DOWNSAMPLE_JPEG_QUALITY: u8 = 70;

/// Accepts a `data:` URL or a bare base64 payload. A bare payload is assumed
/// to be JPEG, matching what browser captures produce.
pub fn normalize(payload: &str) -> Result<EncodedImage, InvalidImageError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(InvalidImageError::Empty);
    }

    let (media_type, encoded) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or(InvalidImageError::MalformedDataUrl)?;
            let mut params = header.split(';');
            let media_type = params.next().unwrap_or_default().trim();
            if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
                return Err(InvalidImageError::MalformedDataUrl);
            }
            let media_type = if media_type.is_empty() {
                DEFAULT_MEDIA_TYPE
            } else {
                media_type
            };
            (media_type, body)
        }
        None => (DEFAULT_MEDIA_TYPE, trimmed),
    };

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(InvalidImageError::Empty);
    }
    let bytes = BASE64.decode(compact.as_bytes())?;
    EncodedImage::new(media_type, bytes)
}

/// Wraps raw bytes, preferring the declared media type, then the sniffed
/// format, then JPEG.
pub fn from_bytes(bytes: Vec<u8>, declared: Option<&str>) -> Result<EncodedImage, InvalidImageError> {
    if bytes.is_empty() {
        return Err(InvalidImageError::Empty);
    }
    let media_type = declared
        .map(str::to_string)
        .or_else(|| {
            image::guess_format(&bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());
    EncodedImage::new(&media_type, bytes)
}

pub fn read_image(path: &Path) -> Result<EncodedImage, InvalidImageError> {
    let bytes = std::fs::read(path).map_err(|source| InvalidImageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_bytes(bytes, media_type_for_path(path))
}

fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Re-encodes as JPEG when the longer side exceeds `max_dim`; smaller images
/// are returned unchanged. Transparent pixels are flattened onto white.
pub fn downsample(image: &EncodedImage, max_dim: u32) -> Result<EncodedImage, InvalidImageError> {
    let dim = max_dim.max(MIN_MAX_DIM);
    let decoded = image::load_from_memory(image.bytes())
        .map_err(|err| InvalidImageError::Decode(err.to_string()))?;
    let (width, height) = decoded.dimensions();
    if width.max(height) <= dim {
        return Ok(image.clone());
    }

    let rgba = decoded.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let resized = DynamicImage::ImageRgba8(flattened)
        .resize(dim, dim, FilterType::Triangle)
        .to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, DOWNSAMPLE_JPEG_QUALITY)
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .map_err(|err| InvalidImageError::Decode(err.to_string()))?;
    debug!(
        from_bytes = image.len(),
        to_bytes = bytes.len(),
        width,
        height,
        "downsampled image"
    );
    EncodedImage::new("image/jpeg", bytes)
}

/// Bounds the payload when possible; formats the decoder cannot read are
/// sent as-is.
pub fn prepare_for_gateway(image: EncodedImage, max_dim: Option<u32>) -> EncodedImage {
    let Some(max_dim) = max_dim else {
        return image;
    };
    match downsample(&image, max_dim) {
        Ok(prepared) => prepared,
        Err(err) => {
            debug!(%err, media_type = image.media_type(), "keeping original image payload");
            image
        }
    }
}
