//! Manifest-driven batch extraction.
//!
//! A manifest is JSON Lines, one sample per line:
//!
//! ```text
//! {"image": "faces/001.jpg", "left": {"x": 102.0, "y": 118.5}, "right": {"x": 161.0, "y": 117.0}, "label": "alice"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::config::DriverConfig;
use anyhow::{bail, Context, Result};
use facepatch_core::{Pipeline, PixelBuffer, Point, Rect};
use facepatch_io::{load_image, save_jpeg, SaveFormat, TrainDataWriter};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestEntry {
    pub image: PathBuf,
    pub left: Point,
    pub right: Point,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Outcome of one manifest line that did not abort the run.
enum LineOutcome {
    Processed,
    Skipped,
}

/// Process every manifest entry, appending features to `writer`.
///
/// Per-sample failures are logged and counted as skipped. Fatal pipeline
/// errors and write failures abort the run.
pub fn run_batch(
    manifest: impl BufRead,
    base_dir: &Path,
    config: &DriverConfig,
    pipeline: &mut Pipeline,
    writer: &mut TrainDataWriter,
    patch_dir: Option<&Path>,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    for (idx, line) in manifest.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading manifest line {line_no}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: ManifestEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed manifest line");
                summary.skipped += 1;
                continue;
            }
        };

        match process_entry(line_no, &entry, base_dir, config, pipeline, writer, patch_dir)? {
            LineOutcome::Processed => summary.processed += 1,
            LineOutcome::Skipped => summary.skipped += 1,
        }
    }

    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        "batch complete"
    );
    Ok(summary)
}

fn process_entry(
    line_no: usize,
    entry: &ManifestEntry,
    base_dir: &Path,
    config: &DriverConfig,
    pipeline: &mut Pipeline,
    writer: &mut TrainDataWriter,
    patch_dir: Option<&Path>,
) -> Result<LineOutcome> {
    let path = base_dir.join(&entry.image);

    let source = match load_image(&path) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(line = line_no, path = %path.display(), error = %e, "skipping sample");
            return Ok(LineOutcome::Skipped);
        }
    };

    let source_rect = Rect::from_size(source.width(), source.height());
    let refs = config.reference_points(entry.left, entry.right);
    let sample = match pipeline.process(&source, &source_rect, &refs) {
        Ok(sample) => sample,
        Err(e) if e.is_fatal() => {
            bail!("line {line_no} ({}): {e}", path.display());
        }
        Err(e) => {
            tracing::warn!(line = line_no, path = %path.display(), error = %e, "skipping sample");
            return Ok(LineOutcome::Skipped);
        }
    };

    writer
        .append(&sample.features, &entry.label)
        .with_context(|| format!("writing features for line {line_no}"))?;

    if let Some(dir) = patch_dir {
        save_patch(dir, line_no, &sample.patch, pipeline.target_rect(), config.jpeg_quality)?;
    }

    Ok(LineOutcome::Processed)
}

/// Save `patch` as `<dir>/<line>.jpg`; patches JPEG cannot hold are skipped.
pub fn save_patch(
    dir: &Path,
    line_no: usize,
    patch: &PixelBuffer,
    rect: Rect,
    quality: u8,
) -> Result<()> {
    let Some(format) = SaveFormat::for_bytes_per_pixel(patch.bytes_per_pixel()) else {
        tracing::debug!(bpp = patch.bytes_per_pixel(), "patch format not saveable as JPEG");
        return Ok(());
    };
    let out = dir.join(format!("{line_no:06}.jpg"));
    save_jpeg(patch.samples(), &rect, &out, format, quality)
        .with_context(|| format!("saving patch for line {line_no}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facepatch_core::{NormalizationMode, PipelineConfig};
    use facepatch_io::DataMode;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facepatch-cli-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write a mid-grey 80×80 JPEG with some structure into `dir`.
    fn write_face(dir: &Path, name: &str) {
        let (w, h) = (80usize, 80usize);
        let mut samples = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let v = 60 + ((x * 3 + y * 2) % 120) as u8;
                samples.extend([v, v / 2 + 10, 255 - v]);
            }
        }
        save_jpeg(&samples, &Rect::from_size(w, h), &dir.join(name), SaveFormat::Rgb8, 90).unwrap();
    }

    fn driver(mode: NormalizationMode) -> DriverConfig {
        DriverConfig {
            pipeline: PipelineConfig::with_mode(mode),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_batch_skips_bad_lines() {
        let dir = temp_dir("batch");
        write_face(&dir, "a.jpg");
        let manifest = concat!(
            "# comment\n",
            r#"{"image": "a.jpg", "left": {"x": 25.0, "y": 30.0}, "right": {"x": 55.0, "y": 30.0}, "label": "alice"}"#,
            "\n\n",
            r#"{"image": "missing.jpg", "left": {"x": 25.0, "y": 30.0}, "right": {"x": 55.0, "y": 30.0}}"#,
            "\n",
            r#"{"image": "a.jpg", "left": {"x": 40.0, "y": 40.0}, "right": {"x": 40.0, "y": 40.0}}"#,
            "\n",
            "not json\n",
        );

        let config = driver(NormalizationMode::ConstantSum);
        let mut pipeline = Pipeline::new(config.pipeline.clone()).unwrap();
        let data_path = dir.join("train.txt");
        let mut writer = TrainDataWriter::create(&data_path, DataMode::Text).unwrap();
        let patches = dir.join("patches");
        std::fs::create_dir_all(&patches).unwrap();

        let summary = run_batch(
            manifest.as_bytes(),
            &dir,
            &config,
            &mut pipeline,
            &mut writer,
            Some(&patches),
        )
        .unwrap();
        writer.finish().unwrap();

        assert_eq!(summary, BatchSummary { processed: 1, skipped: 3 });
        let text = std::fs::read_to_string(&data_path).unwrap();
        assert!(text.starts_with("alice\t"));
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.trim_end().split('\t').nth(1).unwrap().split(' ').count(), 41 * 41 * 3);
        assert!(patches.join("000002.jpg").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_batch_aborts_on_fatal_error() {
        use facepatch_core::descriptor::DescriptorError;
        use facepatch_core::normalize::DescriptorFactory;

        let dir = temp_dir("fatal");
        write_face(&dir, "a.jpg");
        let manifest =
            r#"{"image": "a.jpg", "left": {"x": 25.0, "y": 30.0}, "right": {"x": 55.0, "y": 30.0}}"#;

        let config = driver(NormalizationMode::GridDescriptor);
        let factory: DescriptorFactory =
            Box::new(|| Err(DescriptorError::InvalidParameters("unavailable".into())));
        let mut pipeline =
            Pipeline::with_descriptor_factory(config.pipeline.clone(), factory).unwrap();
        let mut writer = TrainDataWriter::create(&dir.join("train.bin"), DataMode::Binary).unwrap();

        let result = run_batch(manifest.as_bytes(), &dir, &config, &mut pipeline, &mut writer, None);
        assert!(result.is_err());
        assert_eq!(writer.records(), 0);

        drop(writer);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_manifest_entry_label_optional() {
        let entry: ManifestEntry = serde_json::from_str(
            r#"{"image": "x.png", "left": {"x": 1.0, "y": 2.0}, "right": {"x": 3.0, "y": 4.0}}"#,
        )
        .unwrap();
        assert_eq!(entry.label, "");
        assert_eq!(entry.right, Point::new(3.0, 4.0));
    }
}
