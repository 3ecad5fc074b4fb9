use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixelBufferError {
    #[error("sample count mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Interleaved 8-bit pixel samples, row-major with the channel varying fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    samples: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap `samples`, checking that the length matches the dimensions.
    pub fn new(
        width: usize,
        height: usize,
        bytes_per_pixel: usize,
        samples: Vec<u8>,
    ) -> Result<Self, PixelBufferError> {
        let expected = width * height * bytes_per_pixel;
        if samples.len() != expected {
            return Err(PixelBufferError::SizeMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            samples,
        })
    }

    /// Build a buffer whose length the caller has already sized correctly.
    pub(crate) fn from_raw(width: usize, height: usize, bytes_per_pixel: usize, samples: Vec<u8>) -> Self {
        debug_assert_eq!(samples.len(), width * height * bytes_per_pixel);
        Self {
            width,
            height,
            bytes_per_pixel,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Number of pixels (`width * height`).
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Sample of channel `c` at pixel `(x, y)`. Callers keep indices in range.
    pub fn sample(&self, x: usize, y: usize, c: usize) -> u8 {
        self.samples[(y * self.width + x) * self.bytes_per_pixel + c]
    }
}

/// A 2-D point, either normalized to a rect (`[0, 1]`) or in absolute pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle in absolute pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rect anchored at the origin covering `width × height` pixels.
    pub fn from_size(width: usize, height: usize) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    /// Width in whole pixels, truncated toward zero (negative widths give 0).
    pub fn pixel_width(&self) -> usize {
        self.width.max(0.0) as usize
    }

    /// Height in whole pixels, truncated toward zero (negative heights give 0).
    pub fn pixel_height(&self) -> usize {
        self.height.max(0.0) as usize
    }

    pub fn pixel_area(&self) -> usize {
        self.pixel_width() * self.pixel_height()
    }
}

/// Convert a point normalized to `rect` into absolute coordinates.
pub fn normalize_pos_to_abs(point: Point, rect: &Rect) -> Point {
    Point {
        x: rect.left + point.x * rect.width,
        y: rect.top + point.y * rect.height,
    }
}

/// Strategy used to turn an aligned patch into a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    None,
    #[default]
    ConstantSum,
    BlurSubtract,
    BlurSubtract3,
    GridDescriptor,
}

impl NormalizationMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ConstantSum => "constant_sum",
            Self::BlurSubtract => "blur_subtract",
            Self::BlurSubtract3 => "blur_subtract3",
            Self::GridDescriptor => "grid_descriptor",
        }
    }
}

impl std::str::FromStr for NormalizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "constant_sum" | "sum" => Ok(Self::ConstantSum),
            "blur_subtract" | "blur" => Ok(Self::BlurSubtract),
            "blur_subtract3" | "blur3" => Ok(Self::BlurSubtract3),
            "grid_descriptor" | "sift" => Ok(Self::GridDescriptor),
            other => Err(format!("unknown normalization mode: {other}")),
        }
    }
}

impl std::fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Source and target reference point pairs (e.g. the two eye corners).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoints {
    pub source_left: Point,
    pub source_right: Point,
    pub target_left: Point,
    pub target_right: Point,
}
