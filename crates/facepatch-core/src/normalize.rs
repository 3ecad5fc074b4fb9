//! Normalization strategies, one type per [`NormalizationMode`].
//!
//! The pipeline picks a single boxed [`Normalizer`] at construction; each
//! strategy is also usable (and tested) on its own.

use crate::config::{ConfigError, ContrastTarget, PipelineConfig};
use crate::descriptor::{DescriptorEngine, DescriptorError, SiftDescriptor, SiftParameters};
use crate::grid::{extract_grid, GridError};
use crate::imgproc::{self, FloatPlane};
use crate::planes;
use crate::types::{NormalizationMode, PixelBuffer, PixelBufferError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("patch sums to zero, cannot rescale to a constant sum")]
    ZeroIntensity,
    #[error("descriptor engine: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("grid descriptor: {0}")]
    Grid(#[from] GridError),
    #[error(transparent)]
    Buffer(#[from] PixelBufferError),
}

impl NormalizationError {
    /// Engine construction failures cannot be fixed by skipping the sample.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Descriptor(DescriptorError::InvalidParameters(_))
                | Self::Grid(GridError::Descriptor(DescriptorError::InvalidParameters(_)))
        )
    }
}

/// Turns an aligned patch into a feature vector.
pub trait Normalizer: Send {
    fn mode(&self) -> NormalizationMode;

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError>;

    /// Drop any resources held between calls.
    fn release(&mut self) {}
}

/// Builds the descriptor engine the first time a grid descriptor is needed.
pub type DescriptorFactory =
    Box<dyn Fn() -> Result<Box<dyn DescriptorEngine>, DescriptorError> + Send>;

/// Factory for the built-in SIFT-style engine.
pub fn default_descriptor_factory() -> DescriptorFactory {
    Box::new(|| {
        let engine = SiftDescriptor::create(SiftParameters::default())?;
        Ok(Box::new(engine) as Box<dyn DescriptorEngine>)
    })
}

/// Strategy for `config.mode`, with the default descriptor engine.
pub fn normalizer_for(config: &PipelineConfig) -> Result<Box<dyn Normalizer>, ConfigError> {
    normalizer_with_factory(config, default_descriptor_factory())
}

/// Strategy for `config.mode`; `factory` is only used by the grid descriptor mode.
pub fn normalizer_with_factory(
    config: &PipelineConfig,
    factory: DescriptorFactory,
) -> Result<Box<dyn Normalizer>, ConfigError> {
    config.validate()?;
    let normalizer: Box<dyn Normalizer> = match config.mode {
        NormalizationMode::None => Box::new(Passthrough),
        NormalizationMode::ConstantSum => Box::new(ConstantSum::new(
            config.normalize_sum,
            config.default_normalized_len,
        )?),
        NormalizationMode::BlurSubtract => Box::new(BlurSubtract::new(
            config.blur.kernel_size,
            config.blur.variance,
            config.contrast,
        )?),
        NormalizationMode::BlurSubtract3 => Box::new(BlurSubtract3::new(
            config.blur.kernel_size,
            config.blur.variance,
            config.contrast,
        )?),
        NormalizationMode::GridDescriptor => {
            Box::new(GridDescriptor::new(
                config.grid.cell_count,
                config.grid.descriptor_len,
                factory,
            )?)
        }
    };
    Ok(normalizer)
}

/// Returns samples unchanged.
pub struct Passthrough;

impl Normalizer for Passthrough {
    fn mode(&self) -> NormalizationMode {
        NormalizationMode::None
    }

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        Ok(patch.samples().to_vec())
    }
}

/// Rescales samples so their sum matches a target proportional to the sample count.
pub struct ConstantSum {
    normalize_sum: u64,
    default_normalized_len: u64,
}

impl ConstantSum {
    pub fn new(normalize_sum: u64, default_normalized_len: u64) -> Result<Self, ConfigError> {
        if default_normalized_len == 0 {
            return Err(ConfigError::ZeroNormalizedLength);
        }
        Ok(Self {
            normalize_sum,
            default_normalized_len,
        })
    }
}

impl Normalizer for ConstantSum {
    fn mode(&self) -> NormalizationMode {
        NormalizationMode::ConstantSum
    }

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        normalize_by_sum(patch.samples(), self.normalize_sum, self.default_normalized_len)
    }
}

/// `out[i] = min(255, s[i] * target / Σs)` with
/// `target = normalize_sum * len / default_normalized_len`, all in integer arithmetic.
pub fn normalize_by_sum(
    samples: &[u8],
    normalize_sum: u64,
    default_normalized_len: u64,
) -> Result<Vec<u8>, NormalizationError> {
    let sum: u64 = samples.iter().map(|&s| s as u64).sum();
    if sum == 0 {
        return Err(NormalizationError::ZeroIntensity);
    }
    let target = normalize_sum as u128 * samples.len() as u128 / default_normalized_len.max(1) as u128;

    Ok(samples
        .iter()
        .map(|&s| (s as u128 * target / sum as u128).min(u8::MAX as u128) as u8)
        .collect())
}

/// Subtracts a blurred copy of channel 0 and rescales the residual.
pub struct BlurSubtract {
    kernel: FloatPlane,
    contrast: ContrastTarget,
}

impl BlurSubtract {
    pub fn new(kernel_size: usize, variance: f32, contrast: ContrastTarget) -> Result<Self, ConfigError> {
        Ok(Self {
            kernel: imgproc::build_blur_kernel(kernel_size, variance, variance, true)?,
            contrast,
        })
    }
}

impl Normalizer for BlurSubtract {
    fn mode(&self) -> NormalizationMode {
        NormalizationMode::BlurSubtract
    }

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        Ok(normalize_by_blur(patch, &self.kernel, self.contrast))
    }
}

/// High-pass channel 0: `normalize(plane - blur(plane))`, one plane of output.
pub fn normalize_by_blur(patch: &PixelBuffer, kernel: &FloatPlane, contrast: ContrastTarget) -> Vec<u8> {
    if patch.bytes_per_pixel() == 0 {
        return vec![0; patch.pixel_count()];
    }
    let plane = imgproc::plane_from_channel(patch, 0);
    let blurred = imgproc::reflect_convolve(&plane, kernel);
    let residual = imgproc::subtract(&plane, &blurred);
    let rescaled = imgproc::normalize_mean_stdev(&residual, contrast.mean, contrast.stdev);
    imgproc::plane_to_bytes(&rescaled)
}

/// Divides each colour channel by channel 0, blurs the ratio and rescales it.
pub struct BlurSubtract3 {
    kernel: FloatPlane,
    contrast: ContrastTarget,
}

impl BlurSubtract3 {
    pub fn new(kernel_size: usize, variance: f32, contrast: ContrastTarget) -> Result<Self, ConfigError> {
        Ok(Self {
            kernel: imgproc::build_blur_kernel(kernel_size, variance, variance, true)?,
            contrast,
        })
    }
}

impl Normalizer for BlurSubtract3 {
    fn mode(&self) -> NormalizationMode {
        NormalizationMode::BlurSubtract3
    }

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        Ok(normalize_by_blur3(patch, &self.kernel, self.contrast))
    }
}

/// Channels `1..bpp` as `normalize(blur(ch_c / ch_0))`, concatenated in channel order.
///
/// The ratio is 0 wherever channel 0 is 0. Single-channel patches give no output.
pub fn normalize_by_blur3(patch: &PixelBuffer, kernel: &FloatPlane, contrast: ContrastTarget) -> Vec<u8> {
    let bpp = patch.bytes_per_pixel();
    if bpp < 2 {
        tracing::debug!(bpp, "blur_subtract3 needs a second channel; output is empty");
        return Vec::new();
    }

    let base = imgproc::plane_from_channel(patch, 0);
    let mut out = Vec::with_capacity((bpp - 1) * patch.pixel_count());
    for c in 1..bpp {
        let ratio = imgproc::divide(&imgproc::plane_from_channel(patch, c), &base);
        let blurred = imgproc::reflect_convolve(&ratio, kernel);
        let rescaled = imgproc::normalize_mean_stdev(&blurred, contrast.mean, contrast.stdev);
        out.extend(imgproc::plane_to_bytes(&rescaled));
    }
    out
}

/// Concatenated grid-cell descriptors of the greyscale patch.
///
/// The descriptor engine is created on first use and kept until [`release`](Normalizer::release).
pub struct GridDescriptor {
    cell_count: usize,
    descriptor_len: usize,
    factory: DescriptorFactory,
    engine: Option<Box<dyn DescriptorEngine>>,
}

impl GridDescriptor {
    pub fn new(
        cell_count: usize,
        descriptor_len: usize,
        factory: DescriptorFactory,
    ) -> Result<Self, ConfigError> {
        crate::config::cells_per_side(cell_count)?;
        if descriptor_len == 0 {
            return Err(ConfigError::ZeroDescriptorLength);
        }
        Ok(Self {
            cell_count,
            descriptor_len,
            factory,
            engine: None,
        })
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }
}

impl Normalizer for GridDescriptor {
    fn mode(&self) -> NormalizationMode {
        NormalizationMode::GridDescriptor
    }

    fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => {
                let engine = (self.factory)()?;
                // The configured layout must match what the engine produces.
                if engine.descriptor_len() != self.descriptor_len {
                    return Err(DescriptorError::LengthMismatch {
                        expected: self.descriptor_len,
                        actual: engine.descriptor_len(),
                    }
                    .into());
                }
                tracing::info!(len = engine.descriptor_len(), "descriptor engine created");
                engine
            }
        };
        let engine = self.engine.insert(engine);

        let plane = grey_plane(patch);
        Ok(extract_grid(engine.as_mut(), &plane, self.cell_count)?)
    }

    fn release(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("descriptor engine released");
        }
    }
}

/// Single float plane for the descriptor: the patch itself, or its channel average.
fn grey_plane(patch: &PixelBuffer) -> FloatPlane {
    if patch.bytes_per_pixel() == 1 {
        imgproc::plane_from_channel(patch, 0)
    } else {
        imgproc::plane_from_bytes(&planes::to_greyscale(patch), patch.width(), patch.height())
    }
}
