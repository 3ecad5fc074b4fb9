//! Float-plane primitives used by the blur-based normalizers.
//!
//! Planes are `Array2<f32>` indexed `[[y, x]]` (shape `(height, width)`).

use crate::config::ConfigError;
use crate::types::PixelBuffer;
use ndarray::{Array2, Zip};

/// Single-channel float image, shape `(height, width)`.
pub type FloatPlane = Array2<f32>;

/// Map index `i` into `[0, len)` by mirroring about the edge samples
/// without repeating them (`... 2 1 | 0 1 2 ... n-1 | n-2 ...`).
fn reflect101(i: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let period = (2 * len - 2) as isize;
    let r = i.rem_euclid(period) as usize;
    if r < len {
        r
    } else {
        (2 * len - 2) - r
    }
}

/// Extract channel `c` of an interleaved buffer as a float plane.
pub fn plane_from_channel(buf: &PixelBuffer, c: usize) -> FloatPlane {
    Array2::from_shape_fn((buf.height(), buf.width()), |(y, x)| buf.sample(x, y, c) as f32)
}

/// Wrap a row-major single-channel byte plane.
pub fn plane_from_bytes(bytes: &[u8], width: usize, height: usize) -> FloatPlane {
    Array2::from_shape_fn((height, width), |(y, x)| bytes[y * width + x] as f32)
}

/// Clamp to `[0, 255]` and truncate each value to a byte, row-major.
pub fn plane_to_bytes(plane: &FloatPlane) -> Vec<u8> {
    plane.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect()
}

/// Build a `size × size` Gaussian kernel with per-axis variances.
///
/// With `normalize`, the weights sum to 1.
pub fn build_blur_kernel(
    size: usize,
    variance_x: f32,
    variance_y: f32,
    normalize: bool,
) -> Result<FloatPlane, ConfigError> {
    if size == 0 || size % 2 == 0 {
        return Err(ConfigError::InvalidKernelSize(size));
    }
    for variance in [variance_x, variance_y] {
        if variance.is_nan() || variance <= 0.0 {
            return Err(ConfigError::InvalidVariance(variance));
        }
    }

    let center = (size / 2) as f32;
    let mut kernel = Array2::from_shape_fn((size, size), |(y, x)| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        (-(dx * dx / (2.0 * variance_x) + dy * dy / (2.0 * variance_y))).exp()
    });

    if normalize {
        let sum = kernel.sum();
        if sum > 0.0 {
            kernel.mapv_inplace(|v| v / sum);
        }
    }
    Ok(kernel)
}

/// 2-D convolution with a centred kernel and Reflect-101 borders.
///
/// Output has the same shape as `src`.
pub fn reflect_convolve(src: &FloatPlane, kernel: &FloatPlane) -> FloatPlane {
    let (h, w) = src.dim();
    let (kh, kw) = kernel.dim();
    let (cy, cx) = ((kh / 2) as isize, (kw / 2) as isize);

    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut acc = 0.0f32;
        for ky in 0..kh {
            let sy = reflect101(y as isize + cy - ky as isize, h);
            for kx in 0..kw {
                let sx = reflect101(x as isize + cx - kx as isize, w);
                acc += src[[sy, sx]] * kernel[[ky, kx]];
            }
        }
        acc
    })
}

/// Element-wise `a - b`.
pub fn subtract(a: &FloatPlane, b: &FloatPlane) -> FloatPlane {
    Zip::from(a).and(b).map_collect(|&x, &y| x - y)
}

/// Element-wise `a / b`, defined as 0 wherever `b` is 0.
pub fn divide(a: &FloatPlane, b: &FloatPlane) -> FloatPlane {
    Zip::from(a)
        .and(b)
        .map_collect(|&x, &y| if y == 0.0 { 0.0 } else { x / y })
}

/// Population mean and standard deviation.
pub fn mean_stdev(plane: &FloatPlane) -> (f32, f32) {
    let n = plane.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = plane.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = plane
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    (mean as f32, var.sqrt() as f32)
}

/// Affinely rescale `src` to the target mean and standard deviation.
///
/// A constant plane has no spread to rescale and maps to `target_mean`.
pub fn normalize_mean_stdev(src: &FloatPlane, target_mean: f32, target_stdev: f32) -> FloatPlane {
    let (mean, stdev) = mean_stdev(src);
    if stdev <= f32::EPSILON {
        return Array2::from_elem(src.dim(), target_mean);
    }
    let gain = target_stdev / stdev;
    src.mapv(|v| (v - mean) * gain + target_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_reflect101_mapping() {
        let cases = [(-3, 3), (-2, 2), (-1, 1), (0, 0), (4, 4), (5, 3), (6, 2)];
        for (i, expected) in cases {
            assert_eq!(reflect101(i, 5), expected, "i = {i}");
        }
        for i in -4..=4 {
            assert_eq!(reflect101(i, 1), 0);
        }
    }

    #[test]
    fn test_blur_kernel_normalized_and_symmetric() {
        let k = build_blur_kernel(9, 5.0, 5.0, true).unwrap();
        assert_eq!(k.dim(), (9, 9));
        assert!((k.sum() - 1.0).abs() < 1e-5);
        assert_eq!(k[[0, 0]], k[[8, 8]]);
        assert_eq!(k[[2, 7]], k[[7, 2]]);
        // Peak at the centre.
        let peak = k.iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(k[[4, 4]], peak);
    }

    #[test]
    fn test_blur_kernel_rejects_bad_parameters() {
        assert!(matches!(build_blur_kernel(8, 5.0, 5.0, true), Err(ConfigError::InvalidKernelSize(8))));
        assert!(matches!(build_blur_kernel(0, 5.0, 5.0, true), Err(ConfigError::InvalidKernelSize(0))));
        assert!(matches!(build_blur_kernel(9, 0.0, 5.0, true), Err(ConfigError::InvalidVariance(_))));
    }

    #[test]
    fn test_convolve_preserves_constant_plane() {
        let src = Array2::from_elem((7, 5), 42.0f32);
        let k = build_blur_kernel(9, 5.0, 5.0, true).unwrap();
        let out = reflect_convolve(&src, &k);
        assert_eq!(out.dim(), (7, 5));
        assert!(out.iter().all(|&v| (v - 42.0).abs() < 1e-3));
    }

    #[test]
    fn test_convolve_identity_kernel() {
        let src = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let k = array![[0.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        assert_eq!(reflect_convolve(&src, &k), src);
    }

    #[test]
    fn test_convolve_reflects_at_border() {
        // Horizontal [1, 0, 0] kernel picks the right-hand neighbour (kernel is flipped).
        let src = array![[1.0f32, 2.0, 3.0]];
        let k = array![[1.0f32, 0.0, 0.0]];
        // x=2 reads x=3, which reflects to x=1.
        assert_eq!(reflect_convolve(&src, &k), array![[2.0f32, 3.0, 2.0]]);
    }

    #[test]
    fn test_divide_by_zero_yields_zero() {
        let a = array![[10.0f32, 4.0]];
        let b = array![[0.0f32, 2.0]];
        assert_eq!(divide(&a, &b), array![[0.0f32, 2.0]]);
        assert_eq!(subtract(&a, &b), array![[10.0f32, 2.0]]);
    }

    #[test]
    fn test_normalize_mean_stdev() {
        let src = array![[0.0f32, 2.0], [4.0, 6.0]];
        let out = normalize_mean_stdev(&src, 128.0, 32.0);
        let (m, s) = mean_stdev(&out);
        assert!((m - 128.0).abs() < 1e-3, "mean = {m}");
        assert!((s - 32.0).abs() < 1e-3, "stdev = {s}");
    }

    #[test]
    fn test_normalize_constant_plane() {
        let src = Array2::from_elem((3, 3), 9.0f32);
        let out = normalize_mean_stdev(&src, 128.0, 32.0);
        assert!(out.iter().all(|&v| v == 128.0));
    }

    #[test]
    fn test_plane_to_bytes_clamps_and_truncates() {
        let plane = array![[-5.0f32, 12.9], [255.7, 300.0]];
        assert_eq!(plane_to_bytes(&plane), vec![0, 12, 255, 255]);
    }

    #[test]
    fn test_plane_from_channel() {
        let buf = PixelBuffer::new(2, 1, 2, vec![1, 9, 2, 8]).unwrap();
        assert_eq!(plane_from_channel(&buf, 1), array![[9.0f32, 8.0]]);
        assert_eq!(plane_from_bytes(&[3, 4], 2, 1), array![[3.0f32, 4.0]]);
    }
}
