//! One configured extraction pipeline: align, optionally greyscale, normalize,
//! optionally reorder to planar.
//!
//! A `Pipeline` is `Send` but not `Sync`; every stage that touches the
//! descriptor engine takes `&mut self`. Share one across threads behind a
//! `Mutex`, or build one per worker.

use crate::alignment::{self, GeometryError};
use crate::config::{ConfigError, PipelineConfig};
use crate::normalize::{self, DescriptorFactory, NormalizationError, Normalizer};
use crate::planes;
use crate::types::{NormalizationMode, PixelBuffer, PixelBufferError, Rect, ReferencePoints};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("alignment failed: {0}")]
    Geometry(#[from] GeometryError),
    #[error("normalization failed: {0}")]
    Normalization(#[from] NormalizationError),
    #[error("plane reorder failed: {0}")]
    Reorder(#[from] PixelBufferError),
}

impl PipelineError {
    /// Whether a batch run should stop rather than skip this sample.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Normalization(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result of [`Pipeline::process`]: the aligned patch and its feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSample {
    pub patch: PixelBuffer,
    pub features: Vec<u8>,
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Box<dyn Normalizer>,
}

impl Pipeline {
    /// Validate `config` and pick its normalization strategy.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_descriptor_factory(config, normalize::default_descriptor_factory())
    }

    /// Like [`Pipeline::new`], with a custom descriptor engine for the grid mode.
    pub fn with_descriptor_factory(
        config: PipelineConfig,
        factory: DescriptorFactory,
    ) -> Result<Self, ConfigError> {
        let normalizer = normalize::normalizer_with_factory(&config, factory)?;
        tracing::debug!(
            mode = %config.mode,
            width = config.patch_width,
            height = config.patch_height,
            "pipeline created"
        );
        Ok(Self { config, normalizer })
    }

    pub fn mode(&self) -> NormalizationMode {
        self.normalizer.mode()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn target_rect(&self) -> Rect {
        self.config.target_rect()
    }

    /// Resample `source` so the reference points land on their targets.
    pub fn extract_aligned_patch(
        &self,
        source: &PixelBuffer,
        source_rect: &Rect,
        refs: &ReferencePoints,
    ) -> Result<PixelBuffer, GeometryError> {
        alignment::extract_aligned_patch(
            source,
            source_rect,
            refs.source_left,
            refs.source_right,
            refs.target_left,
            refs.target_right,
            &self.target_rect(),
        )
    }

    /// Run the configured strategy on an already aligned patch.
    pub fn normalize(&mut self, patch: &PixelBuffer) -> Result<Vec<u8>, NormalizationError> {
        self.normalizer.normalize(patch)
    }

    /// Full per-sample run.
    ///
    /// Features keep the patch's interleaved layout unless `planar_output`
    /// is set and the strategy returned one value per patch sample.
    pub fn process(
        &mut self,
        source: &PixelBuffer,
        source_rect: &Rect,
        refs: &ReferencePoints,
    ) -> Result<ProcessedSample, PipelineError> {
        let patch = self.extract_aligned_patch(source, source_rect, refs)?;

        let (features, bpp) = if self.config.greyscale && patch.bytes_per_pixel() > 1 {
            let grey = PixelBuffer::new(
                patch.width(),
                patch.height(),
                1,
                planes::to_greyscale(&patch),
            )?;
            (self.normalize(&grey)?, 1)
        } else {
            (self.normalize(&patch)?, patch.bytes_per_pixel())
        };

        let features = if self.config.planar_output
            && bpp > 1
            && keeps_interleaved_layout(self.mode())
            && planes::channel_count_for(features.len(), patch.width(), patch.height()) == bpp
        {
            let interleaved = PixelBuffer::new(patch.width(), patch.height(), bpp, features)?;
            planes::to_planar(&interleaved)
        } else {
            features
        };

        tracing::debug!(mode = %self.mode(), len = features.len(), "sample processed");
        Ok(ProcessedSample { patch, features })
    }

    /// Release the descriptor engine; the next grid normalization recreates it.
    pub fn teardown(&mut self) {
        self.normalizer.release();
    }
}

/// Strategies whose output is one value per input sample, in input order.
fn keeps_interleaved_layout(mode: NormalizationMode) -> bool {
    matches!(mode, NormalizationMode::None | NormalizationMode::ConstantSum)
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorEngine, SiftDescriptor};
    use crate::types::Point;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 64×64 RGB gradient with distinct channels.
    fn source_image() -> PixelBuffer {
        let (w, h) = (64, 64);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.extend([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8 | 1]);
            }
        }
        PixelBuffer::new(w, h, 3, data).unwrap()
    }

    fn eye_refs() -> ReferencePoints {
        ReferencePoints {
            source_left: Point::new(20.0, 30.0),
            source_right: Point::new(44.0, 30.0),
            target_left: Point::new(10.0, 15.0),
            target_right: Point::new(30.0, 15.0),
        }
    }

    fn config(mode: NormalizationMode) -> PipelineConfig {
        PipelineConfig {
            planar_output: false,
            ..PipelineConfig::with_mode(mode)
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut cfg = PipelineConfig::default();
        cfg.grid.cell_count = 3;
        assert!(matches!(Pipeline::new(cfg), Err(ConfigError::NotPerfectSquare(3))));
    }

    #[test]
    fn test_process_lengths_per_mode() {
        let src = source_image();
        let rect = Rect::from_size(64, 64);
        let n = 41 * 41;
        let cases = [
            (NormalizationMode::None, n * 3),
            (NormalizationMode::ConstantSum, n * 3),
            (NormalizationMode::BlurSubtract, n),
            (NormalizationMode::BlurSubtract3, n * 2),
            (NormalizationMode::GridDescriptor, 4 * 128),
        ];
        for (mode, len) in cases {
            let mut p = Pipeline::new(config(mode)).unwrap();
            let sample = p.process(&src, &rect, &eye_refs()).unwrap();
            assert_eq!(sample.features.len(), len, "mode {mode}");
            assert_eq!((sample.patch.width(), sample.patch.height()), (41, 41));
        }
    }

    #[test]
    fn test_planar_output() {
        let src = source_image();
        let rect = Rect::from_size(64, 64);

        let mut interleaved = Pipeline::new(config(NormalizationMode::None)).unwrap();
        let mut planar = Pipeline::new(PipelineConfig {
            planar_output: true,
            ..PipelineConfig::with_mode(NormalizationMode::None)
        })
        .unwrap();

        let a = interleaved.process(&src, &rect, &eye_refs()).unwrap();
        let b = planar.process(&src, &rect, &eye_refs()).unwrap();
        assert_eq!(b.features, planes::to_planar(&a.patch));
        assert_eq!(
            planes::to_interleaved(&b.features, 41, 41, 3).unwrap().samples(),
            a.features.as_slice()
        );
    }

    #[test]
    fn test_planar_output_leaves_blur3_planes_alone() {
        let src = source_image();
        let rect = Rect::from_size(64, 64);
        let mut a = Pipeline::new(config(NormalizationMode::BlurSubtract3)).unwrap();
        let mut b = Pipeline::new(PipelineConfig::with_mode(NormalizationMode::BlurSubtract3)).unwrap();
        assert_eq!(
            a.process(&src, &rect, &eye_refs()).unwrap().features,
            b.process(&src, &rect, &eye_refs()).unwrap().features
        );
    }

    #[test]
    fn test_greyscale_before_normalize() {
        let src = source_image();
        let rect = Rect::from_size(64, 64);
        let mut p = Pipeline::new(PipelineConfig {
            greyscale: true,
            ..PipelineConfig::with_mode(NormalizationMode::None)
        })
        .unwrap();
        let sample = p.process(&src, &rect, &eye_refs()).unwrap();
        assert_eq!(sample.features, planes::to_greyscale(&sample.patch));
    }

    #[test]
    fn test_degenerate_reference_is_not_fatal() {
        let mut refs = eye_refs();
        refs.source_right = refs.source_left;
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = p
            .process(&source_image(), &Rect::from_size(64, 64), &refs)
            .unwrap_err();
        assert_eq!(err, PipelineError::Geometry(GeometryError::DegenerateReference));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_zero_intensity_patch() {
        let src = PixelBuffer::new(8, 8, 3, vec![0; 8 * 8 * 3]).unwrap();
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = p.process(&src, &Rect::from_size(8, 8), &eye_refs()).unwrap_err();
        assert_eq!(err, PipelineError::Normalization(NormalizationError::ZeroIntensity));
    }

    #[test]
    fn test_engine_reused_and_released() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory: DescriptorFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SiftDescriptor::with_default_parameters()) as Box<dyn DescriptorEngine>)
        });
        let mut p =
            Pipeline::with_descriptor_factory(config(NormalizationMode::GridDescriptor), factory)
                .unwrap();

        let src = source_image();
        let rect = Rect::from_size(64, 64);
        for _ in 0..3 {
            p.process(&src, &rect, &eye_refs()).unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);

        p.teardown();
        p.process(&src, &rect, &eye_refs()).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pipeline_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Pipeline>();
    }
}
