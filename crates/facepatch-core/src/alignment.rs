//! Patch alignment via 4-DOF similarity transform.
//!
//! Maps a pair of source landmarks (e.g. eye corners) onto a pair of
//! canonical target positions and resamples the source into a fixed-size
//! patch. Two point pairs determine the transform exactly, so it is solved
//! in closed form.

use crate::types::{PixelBuffer, Point, Rect};
use thiserror::Error;

/// Reference vectors shorter than this are treated as coincident points.
const MIN_REFERENCE_LENGTH: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("reference points coincide; cannot derive rotation and scale")]
    DegenerateReference,
    #[error("source buffer has no pixels to sample")]
    EmptySource,
}

/// 2×3 similarity transform stored as [a, -b, tx, b, a, ty]:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    m: [f64; 6],
}

impl SimilarityTransform {
    /// The unique transform taking `src_left → dst_left` and `src_right → dst_right`.
    ///
    /// Treating points as complex numbers, `z' = s·z + t` with
    /// `s = (dst_right - dst_left) / (src_right - src_left)`.
    pub fn from_point_pairs(
        src_left: Point,
        src_right: Point,
        dst_left: Point,
        dst_right: Point,
    ) -> Result<Self, GeometryError> {
        let (sx, sy) = (src_right.x - src_left.x, src_right.y - src_left.y);
        let (dx, dy) = (dst_right.x - dst_left.x, dst_right.y - dst_left.y);

        let src_len2 = sx * sx + sy * sy;
        if src_len2.sqrt() < MIN_REFERENCE_LENGTH {
            return Err(GeometryError::DegenerateReference);
        }
        // A collapsed target pair gives a zero-scale transform that cannot be inverted.
        if (dx * dx + dy * dy).sqrt() < MIN_REFERENCE_LENGTH {
            return Err(GeometryError::DegenerateReference);
        }

        // (dx + i·dy) / (sx + i·sy)
        let a = (dx * sx + dy * sy) / src_len2;
        let b = (dy * sx - dx * sy) / src_len2;

        let tx = dst_left.x - (a * src_left.x - b * src_left.y);
        let ty = dst_left.y - (b * src_left.x + a * src_left.y);

        Ok(Self {
            m: [a, -b, tx, b, a, ty],
        })
    }

    pub fn matrix(&self) -> [f64; 6] {
        self.m
    }

    /// Uniform scale factor `sqrt(a² + b²)`.
    pub fn scale(&self) -> f64 {
        self.m[0].hypot(self.m[3])
    }

    /// Rotation angle in radians.
    pub fn rotation(&self) -> f64 {
        self.m[3].atan2(self.m[0])
    }

    /// Map a source point into target space.
    pub fn apply(&self, p: Point) -> Point {
        let [a, nb, tx, b, _, ty] = self.m;
        Point {
            x: a * p.x + nb * p.y + tx,
            y: b * p.x + a * p.y + ty,
        }
    }

    /// Map a target point back into source space.
    pub fn apply_inverse(&self, p: Point) -> Point {
        let [a, _, tx, b, _, ty] = self.m;
        // Inverse of [[a, -b], [b, a]] is [[a, b], [-b, a]] / (a² + b²).
        let inv_det = 1.0 / (a * a + b * b);
        let dx = p.x - tx;
        let dy = p.y - ty;
        Point {
            x: (a * dx + b * dy) * inv_det,
            y: (-b * dx + a * dy) * inv_det,
        }
    }
}

/// Bilinear sample of channel `c` at `(sx, sy)`, clamping to the buffer edges.
fn sample_bilinear(src: &PixelBuffer, sx: f64, sy: f64, c: usize) -> f64 {
    let max_x = (src.width() - 1) as f64;
    let max_y = (src.height() - 1) as f64;
    let sx = sx.clamp(0.0, max_x);
    let sy = sy.clamp(0.0, max_y);

    let x0 = sx.floor() as usize;
    let y0 = sy.floor() as usize;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let fx = sx - x0 as f64;
    let fy = sy - y0 as f64;

    let tl = src.sample(x0, y0, c) as f64;
    let tr = src.sample(x1, y0, c) as f64;
    let bl = src.sample(x0, y1, c) as f64;
    let br = src.sample(x1, y1, c) as f64;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resample `source` into a `target_rect`-sized patch under `transform`.
///
/// Output pixel `(ox, oy)` stands for target-space point
/// `(target_rect.left + ox, target_rect.top + oy)`. Source coordinates are
/// relative to `source_rect`'s origin and clamped to the buffer edges.
pub fn warp_similarity(
    source: &PixelBuffer,
    source_rect: &Rect,
    transform: &SimilarityTransform,
    target_rect: &Rect,
) -> Result<PixelBuffer, GeometryError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(GeometryError::EmptySource);
    }

    let out_w = target_rect.pixel_width();
    let out_h = target_rect.pixel_height();
    let bpp = source.bytes_per_pixel();
    let mut output = vec![0u8; out_w * out_h * bpp];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let target = Point::new(target_rect.left + ox as f64, target_rect.top + oy as f64);
            let src = transform.apply_inverse(target);
            let sx = src.x - source_rect.left;
            let sy = src.y - source_rect.top;

            let base = (oy * out_w + ox) * bpp;
            for c in 0..bpp {
                let val = sample_bilinear(source, sx, sy, c);
                output[base + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Ok(PixelBuffer::from_raw(out_w, out_h, bpp, output))
}

/// Extract a patch whose reference points land on the target reference points.
///
/// The output keeps the source's bytes per pixel and measures
/// `trunc(target_rect.width) × trunc(target_rect.height)` pixels.
pub fn extract_aligned_patch(
    source: &PixelBuffer,
    source_rect: &Rect,
    source_left: Point,
    source_right: Point,
    target_left: Point,
    target_right: Point,
    target_rect: &Rect,
) -> Result<PixelBuffer, GeometryError> {
    let transform =
        SimilarityTransform::from_point_pairs(source_left, source_right, target_left, target_right)?;

    tracing::debug!(
        scale = transform.scale(),
        rotation = transform.rotation(),
        width = target_rect.pixel_width(),
        height = target_rect.pixel_height(),
        "aligning patch"
    );

    warp_similarity(source, source_rect, &transform, target_rect)
}
