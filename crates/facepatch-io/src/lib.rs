//! facepatch-io: Image loading/saving and training data files.

pub mod codec;
pub mod train_data;

pub use codec::{load_image, save_jpeg, SaveFormat, DEFAULT_JPEG_QUALITY};
pub use train_data::{DataMode, TrainDataWriter};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("image file not found: {0}")]
    FileNotFound(String),
    #[error("cannot decode {path}: {reason}")]
    DecodeFailure { path: String, reason: String },
    #[error("cannot write {path}: {reason}")]
    WriteFailure { path: String, reason: String },
}

impl IoError {
    pub(crate) fn write(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailure {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
