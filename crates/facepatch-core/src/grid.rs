//! Grid descriptor extraction: one descriptor per cell centre, concatenated.

use crate::config::{cells_per_side, ConfigError};
use crate::descriptor::{DescriptorEngine, DescriptorError, InterestPoint, GRID_ORIENTATION, GRID_STRENGTH};
use crate::imgproc::FloatPlane;
use thiserror::Error;

/// Descriptor support scales with the cell: `scale = cell_width / CELL_SCALE_DIVISOR`.
pub const CELL_SCALE_DIVISOR: f32 = 16.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Interest points at the centre of each cell of a `side × side` grid, row-major.
pub fn cell_points(plane_width: usize, plane_height: usize, side: usize) -> Vec<InterestPoint> {
    let cell_w = plane_width as f32 / side as f32;
    let cell_h = plane_height as f32 / side as f32;
    let scale = cell_w / CELL_SCALE_DIVISOR;

    let mut points = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            points.push(InterestPoint {
                x: (col as f32 + 0.5) * cell_w,
                y: (row as f32 + 0.5) * cell_h,
                scale,
                orientation: GRID_ORIENTATION,
                strength: GRID_STRENGTH,
            });
        }
    }
    points
}

/// Describe every grid cell of `plane` and concatenate the descriptors.
///
/// The engine is updated once with `plane`, then queried once per cell.
/// Output length is `cell_count * engine.descriptor_len()`.
pub fn extract_grid(
    engine: &mut dyn DescriptorEngine,
    plane: &FloatPlane,
    cell_count: usize,
) -> Result<Vec<u8>, GridError> {
    let side = cells_per_side(cell_count)?;
    let (h, w) = plane.dim();
    let expected = engine.descriptor_len();

    engine.update(plane);

    let mut out = Vec::with_capacity(cell_count * expected);
    for point in cell_points(w, h, side) {
        let desc = engine.describe(&point)?;
        if desc.len() != expected {
            return Err(DescriptorError::LengthMismatch {
                expected,
                actual: desc.len(),
            }
            .into());
        }
        out.extend_from_slice(&desc);
    }

    tracing::debug!(cells = cell_count, len = out.len(), "grid descriptor extracted");
    Ok(out)
}
