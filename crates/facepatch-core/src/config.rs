//! Pipeline configuration with documented defaults.

use crate::types::{NormalizationMode, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default patch edge length in pixels.
pub const DEFAULT_PATCH_SIZE: u32 = 41;
/// Default blur kernel edge length.
pub const DEFAULT_BLUR_KERNEL_SIZE: usize = 9;
/// Default Gaussian variance of the blur kernel (both axes).
pub const DEFAULT_BLUR_VARIANCE: f32 = 5.0;
/// Default grid cell count (2 × 2).
pub const DEFAULT_CELL_COUNT: usize = 4;
/// Bytes produced per grid cell by the default descriptor engine.
pub const DEFAULT_DESCRIPTOR_LEN: usize = 128;
/// Mean and standard deviation targets for the blur modes.
pub const DEFAULT_CONTRAST_MEAN: f32 = 128.0;
pub const DEFAULT_CONTRAST_STDEV: f32 = 32.0;
/// Sample count of a 41×41 RGB patch; the constant-sum target refers to it.
pub const DEFAULT_NORMALIZED_LEN: u64 = 41 * 41 * 3;
/// Target sum for `DEFAULT_NORMALIZED_LEN` samples (average intensity 128).
pub const DEFAULT_NORMALIZE_SUM: u64 = DEFAULT_NORMALIZED_LEN * 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("grid cell count {0} is not a non-zero perfect square")]
    NotPerfectSquare(usize),
    #[error("patch size must be non-zero, got {width}x{height}")]
    InvalidPatchSize { width: u32, height: u32 },
    #[error("default_normalized_len must be non-zero")]
    ZeroNormalizedLength,
    #[error("blur kernel size must be odd and non-zero, got {0}")]
    InvalidKernelSize(usize),
    #[error("blur variance must be positive, got {0}")]
    InvalidVariance(f32),
    #[error("contrast stdev must be positive, got {0}")]
    InvalidStdev(f32),
    #[error("descriptor length must be non-zero")]
    ZeroDescriptorLength,
}

/// Gaussian blur parameters for the blur-subtract modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    pub kernel_size: usize,
    pub variance: f32,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            kernel_size: DEFAULT_BLUR_KERNEL_SIZE,
            variance: DEFAULT_BLUR_VARIANCE,
        }
    }
}

/// Mean/stdev targets the blur modes rescale to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContrastTarget {
    pub mean: f32,
    pub stdev: f32,
}

impl Default for ContrastTarget {
    fn default() -> Self {
        Self {
            mean: DEFAULT_CONTRAST_MEAN,
            stdev: DEFAULT_CONTRAST_STDEV,
        }
    }
}

/// Layout of the grid descriptor feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDescriptorConfig {
    /// Number of cells; must be a perfect square.
    pub cell_count: usize,
    /// Bytes per cell descriptor.
    pub descriptor_len: usize,
}

impl Default for GridDescriptorConfig {
    fn default() -> Self {
        Self {
            cell_count: DEFAULT_CELL_COUNT,
            descriptor_len: DEFAULT_DESCRIPTOR_LEN,
        }
    }
}

/// Everything a [`Pipeline`](crate::Pipeline) needs, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: NormalizationMode,
    pub patch_width: u32,
    pub patch_height: u32,
    /// Constant-sum target for `default_normalized_len` samples.
    pub normalize_sum: u64,
    pub default_normalized_len: u64,
    pub blur: BlurConfig,
    pub contrast: ContrastTarget,
    pub grid: GridDescriptorConfig,
    /// Average colour channels before normalizing.
    pub greyscale: bool,
    /// Store multi-channel output channel-major.
    pub planar_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: NormalizationMode::default(),
            patch_width: DEFAULT_PATCH_SIZE,
            patch_height: DEFAULT_PATCH_SIZE,
            normalize_sum: DEFAULT_NORMALIZE_SUM,
            default_normalized_len: DEFAULT_NORMALIZED_LEN,
            blur: BlurConfig::default(),
            contrast: ContrastTarget::default(),
            grid: GridDescriptorConfig::default(),
            greyscale: false,
            planar_output: true,
        }
    }
}

impl PipelineConfig {
    /// Default configuration with a different normalization mode.
    pub fn with_mode(mode: NormalizationMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Target patch rectangle anchored at the origin.
    pub fn target_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.patch_width as f64, self.patch_height as f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch_width == 0 || self.patch_height == 0 {
            return Err(ConfigError::InvalidPatchSize {
                width: self.patch_width,
                height: self.patch_height,
            });
        }
        if self.default_normalized_len == 0 {
            return Err(ConfigError::ZeroNormalizedLength);
        }
        if self.blur.kernel_size == 0 || self.blur.kernel_size % 2 == 0 {
            return Err(ConfigError::InvalidKernelSize(self.blur.kernel_size));
        }
        if self.blur.variance.is_nan() || self.blur.variance <= 0.0 {
            return Err(ConfigError::InvalidVariance(self.blur.variance));
        }
        if self.contrast.stdev.is_nan() || self.contrast.stdev <= 0.0 {
            return Err(ConfigError::InvalidStdev(self.contrast.stdev));
        }
        cells_per_side(self.grid.cell_count)?;
        if self.grid.descriptor_len == 0 {
            return Err(ConfigError::ZeroDescriptorLength);
        }
        Ok(())
    }
}

/// Side length of a square grid with `cell_count` cells.
pub fn cells_per_side(cell_count: usize) -> Result<usize, ConfigError> {
    let side = (cell_count as f64).sqrt().round() as usize;
    if cell_count == 0 || side * side != cell_count {
        return Err(ConfigError::NotPerfectSquare(cell_count));
    }
    Ok(side)
}
