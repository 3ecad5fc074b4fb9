//! Training data file writer.
//!
//! Text files hold one sample per line: `label<TAB>v0 v1 v2 ...`.
//!
//! Binary files start with the magic `FPTD` and a little-endian `u16`
//! format version, followed by one record per sample:
//!
//! ```text
//! u16 LE  label length
//! [u8]    label (UTF-8)
//! u32 LE  feature length
//! [u8]    features
//! ```

use crate::IoError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const BINARY_MAGIC: &[u8; 4] = b"FPTD";
pub const BINARY_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Text,
    Binary,
}

impl std::str::FromStr for DataMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "binary" | "bin" => Ok(Self::Binary),
            other => Err(format!("unknown data mode: {other}")),
        }
    }
}

fn binary_header() -> [u8; 6] {
    let mut header = [0u8; 6];
    header[..4].copy_from_slice(BINARY_MAGIC);
    header[4..].copy_from_slice(&BINARY_VERSION.to_le_bytes());
    header
}

/// Appends labelled feature vectors to a training data file.
pub struct TrainDataWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    mode: DataMode,
    records: usize,
}

impl TrainDataWriter {
    /// Create (or truncate) `path` and write the header for `mode`.
    pub fn create(path: &Path, mode: DataMode) -> Result<Self, IoError> {
        let file = File::create(path).map_err(|e| IoError::write(path, e))?;
        let mut writer = BufWriter::new(file);

        if mode == DataMode::Binary {
            writer
                .write_all(&binary_header())
                .map_err(|e| IoError::write(path, e))?;
        }

        tracing::debug!(path = %path.display(), ?mode, "training data file created");
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            mode,
            records: 0,
        })
    }

    /// Open `path` for appending, creating it if needed.
    ///
    /// A new or empty binary file gets the header; an existing binary file
    /// must carry a matching magic and version.
    pub fn open_append(path: &Path, mode: DataMode) -> Result<Self, IoError> {
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IoError::write(path, e))?;
        let existing = file.metadata().map_err(|e| IoError::write(path, e))?.len();

        if mode == DataMode::Binary && existing > 0 {
            let mut header = [0u8; 6];
            file.read_exact(&mut header)
                .map_err(|e| IoError::write(path, format!("reading header: {e}")))?;
            if &header[..4] != BINARY_MAGIC {
                return Err(IoError::write(path, "not a facepatch binary data file"));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version != BINARY_VERSION {
                return Err(IoError::write(
                    path,
                    format!("unsupported format version {version}, expected {BINARY_VERSION}"),
                ));
            }
        }

        let mut writer = BufWriter::new(file);
        if mode == DataMode::Binary && existing == 0 {
            writer
                .write_all(&binary_header())
                .map_err(|e| IoError::write(path, e))?;
        }

        tracing::debug!(
            path = %path.display(),
            ?mode,
            existing,
            "training data file opened for append"
        );
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            mode,
            records: 0,
        })
    }

    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// Records appended so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn append(&mut self, features: &[u8], label: &str) -> Result<(), IoError> {
        match self.mode {
            DataMode::Text => self.append_text(features, label)?,
            DataMode::Binary => self.append_binary(features, label)?,
        }
        self.records += 1;
        Ok(())
    }

    fn append_text(&mut self, features: &[u8], label: &str) -> Result<(), IoError> {
        if label.contains(['\t', '\n', '\r']) {
            return Err(IoError::write(&self.path, format!("label {label:?} contains a separator")));
        }

        let mut line = String::with_capacity(label.len() + features.len() * 4 + 1);
        line.push_str(label);
        line.push('\t');
        for (i, v) in features.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&v.to_string());
        }
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| IoError::write(&self.path, e))
    }

    fn append_binary(&mut self, features: &[u8], label: &str) -> Result<(), IoError> {
        let label_len = u16::try_from(label.len())
            .map_err(|_| IoError::write(&self.path, format!("label is {} bytes", label.len())))?;
        let feature_len = u32::try_from(features.len()).map_err(|_| {
            IoError::write(&self.path, format!("feature vector is {} bytes", features.len()))
        })?;

        let mut record = Vec::with_capacity(2 + label.len() + 4 + features.len());
        record.extend_from_slice(&label_len.to_le_bytes());
        record.extend_from_slice(label.as_bytes());
        record.extend_from_slice(&feature_len.to_le_bytes());
        record.extend_from_slice(features);

        self.writer
            .write_all(&record)
            .map_err(|e| IoError::write(&self.path, e))
    }

    /// Flush and close the file, returning the number of records written.
    pub fn finish(mut self) -> Result<usize, IoError> {
        self.writer
            .flush()
            .map_err(|e| IoError::write(&self.path, e))?;
        tracing::info!(path = %self.path.display(), records = self.records, "training data written");
        Ok(self.records)
    }
}
