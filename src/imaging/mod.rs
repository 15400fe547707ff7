//! Image codec used at the HTTP boundary.
//!
//! Uploads are sniffed and fully decoded once so only well-formed PNG and JPEG
//! files ever reach the store. Reads re-encode the stored image as PNG.

use chrono::Utc;
use image::{GenericImageView, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use thiserror::Error;

use crate::models::Image;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("Image is empty")]
    Empty,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Image could not be encoded: {0}")]
    Encode(#[source] image::ImageError),
}

/// Validate uploaded bytes and wrap them in an unsaved `Image`.
pub fn decode_upload(data: Vec<u8>) -> Result<Image, ImagingError> {
    if data.is_empty() {
        return Err(ImagingError::Empty);
    }

    let format = image::guess_format(&data)
        .map_err(|_| ImagingError::UnsupportedFormat("unknown".to_string()))?;
    let content_type = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        other => return Err(ImagingError::UnsupportedFormat(format!("{:?}", other))),
    };

    let decoded =
        image::load_from_memory_with_format(&data, format).map_err(ImagingError::Decode)?;
    let (width, height) = decoded.dimensions();

    Ok(Image {
        id: String::new(),
        data,
        content_type: content_type.to_string(),
        width,
        height,
        created_at: Utc::now(),
    })
}

/// Re-encode a stored image as PNG.
pub fn encode_png(image: &Image) -> Result<Vec<u8>, ImagingError> {
    let decoded = image::load_from_memory(&image.data).map_err(ImagingError::Decode)?;

    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(ImagingError::Encode)?;
    Ok(out.into_inner())
}
