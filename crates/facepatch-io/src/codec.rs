//! Photograph decoding and patch JPEG encoding via the `image` crate.

use crate::IoError;
use facepatch_core::{PixelBuffer, Rect};
use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// JPEG quality used for saved patches unless configured otherwise.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// Pixel layout of the samples handed to [`save_jpeg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    Rgb8,
    Gray8,
}

impl SaveFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Gray8 => 1,
        }
    }

    /// Format matching a buffer's channel count, if JPEG can store it.
    pub fn for_bytes_per_pixel(bpp: usize) -> Option<Self> {
        match bpp {
            3 => Some(Self::Rgb8),
            1 => Some(Self::Gray8),
            _ => None,
        }
    }

    fn color_type(self) -> image::ExtendedColorType {
        match self {
            Self::Rgb8 => image::ExtendedColorType::Rgb8,
            Self::Gray8 => image::ExtendedColorType::L8,
        }
    }
}

/// Decode a photograph into a 24-bit RGB buffer.
///
/// Any decodable format is accepted; alpha and higher bit depths are dropped.
pub fn load_image(path: &Path) -> Result<PixelBuffer, IoError> {
    if !path.is_file() {
        return Err(IoError::FileNotFound(path.display().to_string()));
    }

    let decode_err = |reason: String| IoError::DecodeFailure {
        path: path.display().to_string(),
        reason,
    };

    let rgb = image::open(path).map_err(|e| decode_err(e.to_string()))?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let buffer = PixelBuffer::new(width as usize, height as usize, 3, rgb.into_raw())
        .map_err(|e| decode_err(e.to_string()))?;

    tracing::info!(path = %path.display(), width, height, "image loaded");
    Ok(buffer)
}

/// Encode the top-left `rect`-sized region of `samples` as a JPEG file.
///
/// A zero-area `rect` writes nothing.
pub fn save_jpeg(
    samples: &[u8],
    rect: &Rect,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), IoError> {
    if rect.pixel_area() == 0 {
        return Ok(());
    }

    let (width, height) = (rect.pixel_width(), rect.pixel_height());
    let expected = rect.pixel_area() * format.bytes_per_pixel();
    if samples.len() < expected {
        return Err(IoError::write(
            path,
            format!("need {expected} samples for {width}x{height}, got {}", samples.len()),
        ));
    }

    let file = File::create(path).map_err(|e| IoError::write(path, e))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .write_image(
            &samples[..expected],
            width as u32,
            height as u32,
            format.color_type(),
        )
        .map_err(|e| IoError::write(path, e))?;
    writer.flush().map_err(|e| IoError::write(path, e))?;

    tracing::debug!(path = %path.display(), width, height, quality, "patch saved");
    Ok(())
}
