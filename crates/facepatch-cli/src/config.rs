use anyhow::{bail, Context, Result};
use facepatch_core::{normalize_pos_to_abs, NormalizationMode, PipelineConfig, Point, ReferencePoints};
use facepatch_io::{DataMode, DEFAULT_JPEG_QUALITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Default target reference points, as fractions of the patch size.
const DEFAULT_TARGET_LEFT: Point = Point { x: 0.25, y: 0.35 };
const DEFAULT_TARGET_RIGHT: Point = Point { x: 0.75, y: 0.35 };

/// Driver configuration: an optional TOML file overlaid by `FACEPATCH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub pipeline: PipelineConfig,
    /// Where the left reference point lands, relative to the patch (0.0–1.0).
    pub target_left: Point,
    pub target_right: Point,
    /// Training data file format.
    pub data_mode: DataMode,
    /// JPEG quality for saved patches (1–100).
    pub jpeg_quality: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            target_left: DEFAULT_TARGET_LEFT,
            target_right: DEFAULT_TARGET_RIGHT,
            data_mode: DataMode::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl DriverConfig {
    /// Load `path` (defaults if `None`), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `FACEPATCH_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = env_parse::<NormalizationMode>(&lookup, "FACEPATCH_MODE") {
            self.pipeline.mode = mode;
        }
        if let Some(size) = env_parse::<u32>(&lookup, "FACEPATCH_PATCH_SIZE") {
            self.pipeline.patch_width = size;
            self.pipeline.patch_height = size;
        }
        if let Some(cells) = env_parse::<usize>(&lookup, "FACEPATCH_CELL_COUNT") {
            self.pipeline.grid.cell_count = cells;
        }
        if let Some(mode) = env_parse::<DataMode>(&lookup, "FACEPATCH_DATA_MODE") {
            self.data_mode = mode;
        }
        if let Some(quality) = env_parse::<u8>(&lookup, "FACEPATCH_JPEG_QUALITY") {
            self.jpeg_quality = quality;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate().context("invalid pipeline configuration")?;
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg_quality must be in 1..=100, got {}", self.jpeg_quality);
        }
        if self.target_left == self.target_right {
            bail!("target_left and target_right must differ");
        }
        Ok(())
    }

    /// Reference points for one photograph, with targets in patch pixels.
    pub fn reference_points(&self, source_left: Point, source_right: Point) -> ReferencePoints {
        let rect = self.pipeline.target_rect();
        ReferencePoints {
            source_left,
            source_right,
            target_left: normalize_pos_to_abs(self.target_left, &rect),
            target_right: normalize_pos_to_abs(self.target_right, &rect),
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = DriverConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.jpeg_quality, 50);
        assert_eq!(cfg.data_mode, DataMode::Text);
    }

    #[test]
    fn test_partial_toml() {
        let cfg = DriverConfig::from_toml_str(
            r#"
            data_mode = "binary"

            [pipeline]
            mode = "grid_descriptor"
            patch_width = 32

            [pipeline.grid]
            cell_count = 16
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data_mode, DataMode::Binary);
        assert_eq!(cfg.pipeline.mode, NormalizationMode::GridDescriptor);
        assert_eq!((cfg.pipeline.patch_width, cfg.pipeline.patch_height), (32, 41));
        assert_eq!(cfg.pipeline.grid.cell_count, 16);
        assert_eq!(cfg.pipeline.grid.descriptor_len, 128);
        assert_eq!(cfg.target_left, DEFAULT_TARGET_LEFT);
    }

    #[test]
    fn test_toml_roundtrip() {
        let cfg = DriverConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(DriverConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(DriverConfig::from_toml_str("[pipeline]\nmode = \"fancy\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = DriverConfig::default();
        cfg.apply_overrides(lookup(&[
            ("FACEPATCH_MODE", "blur3"),
            ("FACEPATCH_PATCH_SIZE", "64"),
            ("FACEPATCH_CELL_COUNT", "9"),
            ("FACEPATCH_DATA_MODE", "bin"),
            ("FACEPATCH_JPEG_QUALITY", "85"),
        ]));
        assert_eq!(cfg.pipeline.mode, NormalizationMode::BlurSubtract3);
        assert_eq!((cfg.pipeline.patch_width, cfg.pipeline.patch_height), (64, 64));
        assert_eq!(cfg.pipeline.grid.cell_count, 9);
        assert_eq!(cfg.data_mode, DataMode::Binary);
        assert_eq!(cfg.jpeg_quality, 85);
    }

    #[test]
    fn test_invalid_env_override_ignored() {
        let mut cfg = DriverConfig::default();
        cfg.apply_overrides(lookup(&[("FACEPATCH_PATCH_SIZE", "big"), ("FACEPATCH_MODE", "x")]));
        assert_eq!(cfg, DriverConfig::default());
    }

    #[test]
    fn test_validate() {
        let mut cfg = DriverConfig::default();
        cfg.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DriverConfig::default();
        cfg.pipeline.grid.cell_count = 8;
        assert!(cfg.validate().is_err());

        let mut cfg = DriverConfig::default();
        cfg.target_right = cfg.target_left;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reference_points_scale_to_patch() {
        let cfg = DriverConfig::default();
        let refs = cfg.reference_points(Point::new(100.0, 120.0), Point::new(160.0, 118.0));
        assert_eq!(refs.source_left, Point::new(100.0, 120.0));
        assert_eq!(refs.target_left, Point::new(0.25 * 41.0, 0.35 * 41.0));
        assert_eq!(refs.target_right, Point::new(0.75 * 41.0, 0.35 * 41.0));
    }
}
