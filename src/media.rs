//! Image decoding, rescaling and re-encoding for downloaded illustrations.

use crate::model::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use std::io::Cursor;
use thiserror::Error;

/// Default bound on the longer side of stored images.
pub const DEFAULT_MAX_IMAGE_SIDE: u32 = 800;

/// JPEG quality of re-encoded images.
const JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Empty image data")]
    Empty,

    #[error("Cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Cannot encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decode `data` (any supported format), shrink it so that neither side exceeds `max_side`
/// (aspect ratio preserved, never enlarged) and re-encode it as JPEG.
pub fn decode_and_rescale(data: &[u8], max_side: u32) -> Result<ImageData, MediaError> {
    if data.is_empty() {
        return Err(MediaError::Empty);
    }
    let img = image::load_from_memory(data).map_err(MediaError::Decode)?;
    let (w, h) = img.dimensions();
    let max_side = max_side.max(1);

    let img = if w > max_side || h > max_side {
        img.resize(max_side, max_side, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).map_err(MediaError::Encode)?;

    Ok(ImageData {
        bytes,
        width,
        height,
    })
}

/// Validate already processed bytes (e.g. from the cache) and read their dimensions. The bytes
/// are kept as they are.
pub fn inspect(data: &[u8]) -> Result<ImageData, MediaError> {
    if data.is_empty() {
        return Err(MediaError::Empty);
    }
    let (width, height) = image::load_from_memory(data)
        .map_err(MediaError::Decode)?
        .dimensions();
    Ok(ImageData {
        bytes: data.to_vec(),
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) fn make_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    img.write_with_encoder(encoder).unwrap();
    buf
}
