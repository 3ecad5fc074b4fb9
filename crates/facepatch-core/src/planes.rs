//! Plane reordering: interleaved ↔ planar layout and greyscale averaging.

use crate::types::{PixelBuffer, PixelBufferError};

/// Reorder interleaved samples into channel-major order.
///
/// All of channel 0 comes first (row-major), then channel 1, and so on.
/// Single-channel buffers are copied unchanged.
pub fn to_planar(patch: &PixelBuffer) -> Vec<u8> {
    let bpp = patch.bytes_per_pixel();
    let samples = patch.samples();
    if bpp <= 1 {
        return samples.to_vec();
    }

    let mut planar = Vec::with_capacity(samples.len());
    for c in 0..bpp {
        planar.extend(samples.iter().skip(c).step_by(bpp).copied());
    }
    planar
}

/// Inverse of [`to_planar`]: rebuild an interleaved buffer from channel planes.
pub fn to_interleaved(
    planar: &[u8],
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
) -> Result<PixelBuffer, PixelBufferError> {
    let plane_len = width * height;
    let expected = plane_len * bytes_per_pixel;
    if planar.len() != expected {
        return Err(PixelBufferError::SizeMismatch {
            expected,
            actual: planar.len(),
        });
    }

    let mut interleaved = vec![0u8; expected];
    for (c, plane) in planar.chunks(plane_len.max(1)).enumerate() {
        for (i, &v) in plane.iter().enumerate() {
            interleaved[i * bytes_per_pixel + c] = v;
        }
    }
    PixelBuffer::new(width, height, bytes_per_pixel, interleaved)
}

/// Average all channels of each pixel into one greyscale plane (integer, truncating).
pub fn to_greyscale(patch: &PixelBuffer) -> Vec<u8> {
    let bpp = patch.bytes_per_pixel();
    if bpp == 0 {
        return vec![0; patch.pixel_count()];
    }
    patch
        .samples()
        .chunks_exact(bpp)
        .map(|px| (px.iter().map(|&v| v as u32).sum::<u32>() / bpp as u32) as u8)
        .collect()
}

/// Number of colour planes implied by `len` samples over a `width × height` patch.
pub fn channel_count_for(len: usize, width: usize, height: usize) -> usize {
    let pixels = width * height;
    if pixels == 0 {
        0
    } else {
        len / pixels
    }
}
