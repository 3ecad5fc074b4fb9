//! facepatch-core: Aligned patch extraction and feature normalization.
//!
//! Rotates and scales a region of a photograph so two reference points
//! (typically the eyes) land on fixed target positions, then turns the
//! resulting patch into a training feature vector using one of several
//! normalization strategies.

pub mod alignment;
pub mod config;
pub mod descriptor;
pub mod grid;
pub mod imgproc;
pub mod normalize;
pub mod pipeline;
pub mod planes;
pub mod types;

pub use alignment::GeometryError;
pub use config::{ConfigError, PipelineConfig};
pub use normalize::NormalizationError;
pub use pipeline::{Pipeline, PipelineError, ProcessedSample};
pub use types::{
    normalize_pos_to_abs, NormalizationMode, PixelBuffer, PixelBufferError, Point, Rect,
    ReferencePoints,
};
