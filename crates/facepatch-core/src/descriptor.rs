//! Local gradient-histogram descriptor engine (SIFT-style).
//!
//! The engine follows an update-then-query protocol: [`DescriptorEngine::update`]
//! precomputes gradients for one plane, and every [`DescriptorEngine::describe`]
//! call reads from that plane until the next update.

use crate::imgproc::FloatPlane;
use ndarray::Array2;
use std::f32::consts::TAU;
use thiserror::Error;

/// Orientation and strength the grid extractor passes for every cell.
pub const GRID_ORIENTATION: f32 = 0.0;
pub const GRID_STRENGTH: f32 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("invalid descriptor parameters: {0}")]
    InvalidParameters(String),
    #[error("descriptor engine queried before update")]
    NotUpdated,
    #[error("descriptor length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Where and at what size a descriptor is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestPoint {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    /// Dominant orientation in radians.
    pub orientation: f32,
    /// Detector response; carried for interface compatibility, not used by the histogram.
    pub strength: f32,
}

/// Engine that turns a float plane plus a keypoint into a fixed-length byte descriptor.
pub trait DescriptorEngine: Send {
    /// Bytes returned by every [`describe`](Self::describe) call.
    fn descriptor_len(&self) -> usize;

    /// Load a new plane. Invalidates anything derived from the previous one.
    fn update(&mut self, plane: &FloatPlane);

    fn describe(&self, point: &InterestPoint) -> Result<Vec<u8>, DescriptorError>;
}

/// Histogram layout and normalization constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiftParameters {
    /// Spatial bins per side (4 → 4×4 grid).
    pub spatial_bins: usize,
    pub orientation_bins: usize,
    /// Width of one spatial bin in multiples of the keypoint scale.
    pub magnification: f32,
    /// Per-element cap applied after the first L2 normalization.
    pub clip: f32,
    /// Factor applied before saturating to bytes.
    pub byte_scale: f32,
}

impl Default for SiftParameters {
    fn default() -> Self {
        Self {
            spatial_bins: 4,
            orientation_bins: 8,
            magnification: 3.0,
            clip: 0.2,
            byte_scale: 512.0,
        }
    }
}

impl SiftParameters {
    pub fn descriptor_len(&self) -> usize {
        self.spatial_bins * self.spatial_bins * self.orientation_bins
    }
}

/// Default [`DescriptorEngine`]: 4×4 spatial × 8 orientation histogram, 128 bytes.
pub struct SiftDescriptor {
    params: SiftParameters,
    magnitude: Array2<f32>,
    angle: Array2<f32>,
    updated: bool,
}

impl SiftDescriptor {
    /// Create an engine with explicit parameters.
    pub fn create(params: SiftParameters) -> Result<Self, DescriptorError> {
        if params.spatial_bins == 0 || params.orientation_bins == 0 {
            return Err(DescriptorError::InvalidParameters(format!(
                "bin counts must be non-zero (spatial {}, orientation {})",
                params.spatial_bins, params.orientation_bins
            )));
        }
        if params.magnification.is_nan() || params.magnification <= 0.0 {
            return Err(DescriptorError::InvalidParameters(format!(
                "magnification must be positive, got {}",
                params.magnification
            )));
        }
        Ok(Self {
            params,
            magnitude: Array2::zeros((0, 0)),
            angle: Array2::zeros((0, 0)),
            updated: false,
        })
    }

    pub fn with_default_parameters() -> Self {
        Self {
            params: SiftParameters::default(),
            magnitude: Array2::zeros((0, 0)),
            angle: Array2::zeros((0, 0)),
            updated: false,
        }
    }

    pub fn parameters(&self) -> &SiftParameters {
        &self.params
    }

    /// Accumulate the weighted orientation histogram around `point`.
    fn histogram(&self, point: &InterestPoint) -> Vec<f32> {
        let d = self.params.spatial_bins;
        let n = self.params.orientation_bins;
        let (h, w) = self.magnitude.dim();
        let mut hist = vec![0.0f32; d * d * n];

        let bin_width = (self.params.magnification * point.scale).max(f32::EPSILON);
        let half = d as f32 / 2.0;
        // Window covers the bins plus one for interpolation, rotated by up to 45°.
        let radius = (bin_width * (d as f32 + 1.0) * std::f32::consts::SQRT_2 * 0.5).round() as isize;
        let (sin_t, cos_t) = point.orientation.sin_cos();
        let sigma = half;

        let cx = point.x.round() as isize;
        let cy = point.y.round() as isize;

        for py in (cy - radius)..=(cy + radius) {
            if py < 0 || py >= h as isize {
                continue;
            }
            for px in (cx - radius)..=(cx + radius) {
                if px < 0 || px >= w as isize {
                    continue;
                }
                let ox = px as f32 - point.x;
                let oy = py as f32 - point.y;
                // Rotate into the keypoint frame, in bin units.
                let rx = (cos_t * ox + sin_t * oy) / bin_width;
                let ry = (-sin_t * ox + cos_t * oy) / bin_width;
                let col = rx + half - 0.5;
                let row = ry + half - 0.5;
                if row <= -1.0 || row >= d as f32 || col <= -1.0 || col >= d as f32 {
                    continue;
                }

                let (yy, xx) = (py as usize, px as usize);
                let mag = self.magnitude[[yy, xx]];
                if mag == 0.0 {
                    continue;
                }
                let weight = (-(rx * rx + ry * ry) / (2.0 * sigma * sigma)).exp();
                let theta = (self.angle[[yy, xx]] - point.orientation).rem_euclid(TAU);
                let obin = theta * n as f32 / TAU;

                accumulate_trilinear(&mut hist, d, n, row, col, obin, mag * weight);
            }
        }
        hist
    }
}

/// Spread `value` over the 8 neighbouring (row, col, orientation) bins.
fn accumulate_trilinear(
    hist: &mut [f32],
    d: usize,
    n: usize,
    row: f32,
    col: f32,
    obin: f32,
    value: f32,
) {
    let r0 = row.floor();
    let c0 = col.floor();
    let o0 = obin.floor();
    let dr = row - r0;
    let dc = col - c0;
    let dob = obin - o0;

    for (ri, rw) in [(r0 as isize, 1.0 - dr), (r0 as isize + 1, dr)] {
        if ri < 0 || ri >= d as isize {
            continue;
        }
        for (ci, cw) in [(c0 as isize, 1.0 - dc), (c0 as isize + 1, dc)] {
            if ci < 0 || ci >= d as isize {
                continue;
            }
            for (oi, ow) in [(o0 as isize, 1.0 - dob), (o0 as isize + 1, dob)] {
                let oi = oi.rem_euclid(n as isize) as usize;
                let idx = (ri as usize * d + ci as usize) * n + oi;
                hist[idx] += value * rw * cw * ow;
            }
        }
    }
}

/// L2-normalize, clip, renormalize, then scale and saturate to bytes.
fn finalize_descriptor(hist: &mut [f32], clip: f32, byte_scale: f32) -> Vec<u8> {
    fn l2_normalize(v: &mut [f32]) {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
    }

    l2_normalize(hist);
    hist.iter_mut().for_each(|x| *x = x.min(clip));
    l2_normalize(hist);

    hist.iter()
        .map(|&x| (x * byte_scale).clamp(0.0, 255.0) as u8)
        .collect()
}

impl DescriptorEngine for SiftDescriptor {
    fn descriptor_len(&self) -> usize {
        self.params.descriptor_len()
    }

    fn update(&mut self, plane: &FloatPlane) {
        let (h, w) = plane.dim();
        let mut magnitude = Array2::zeros((h, w));
        let mut angle = Array2::zeros((h, w));

        // Central differences, clamped at the borders.
        for y in 0..h {
            let yu = y.saturating_sub(1);
            let yd = (y + 1).min(h - 1);
            for x in 0..w {
                let xl = x.saturating_sub(1);
                let xr = (x + 1).min(w - 1);
                let gx = plane[[y, xr]] - plane[[y, xl]];
                let gy = plane[[yd, x]] - plane[[yu, x]];
                magnitude[[y, x]] = (gx * gx + gy * gy).sqrt();
                angle[[y, x]] = gy.atan2(gx);
            }
        }

        self.magnitude = magnitude;
        self.angle = angle;
        self.updated = true;
    }

    fn describe(&self, point: &InterestPoint) -> Result<Vec<u8>, DescriptorError> {
        if !self.updated {
            return Err(DescriptorError::NotUpdated);
        }
        let mut hist = self.histogram(point);
        Ok(finalize_descriptor(
            &mut hist,
            self.params.clip,
            self.params.byte_scale,
        ))
    }
}
