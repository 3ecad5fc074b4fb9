mod batch;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::DriverConfig;
use facepatch_core::{Pipeline, Point, Rect};
use facepatch_io::{load_image, save_jpeg, SaveFormat, TrainDataWriter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facepatch", about = "Aligned face patch extraction for training data")]
struct Cli {
    /// TOML configuration file (FACEPATCH_* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and normalize one patch from a photograph
    Extract {
        /// Source photograph
        #[arg(long)]
        image: PathBuf,
        /// Left reference point in image pixels, as X,Y
        #[arg(long, value_parser = parse_point)]
        left: Point,
        /// Right reference point in image pixels, as X,Y
        #[arg(long, value_parser = parse_point)]
        right: Point,
        /// Label stored with the features
        #[arg(short, long, default_value = "")]
        label: String,
        /// Save the aligned patch as JPEG
        #[arg(long)]
        save_patch: Option<PathBuf>,
        /// Append features to this training data file (created if missing)
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Process every sample listed in a JSON Lines manifest
    Batch {
        /// Manifest file; image paths are relative to its directory
        #[arg(long)]
        manifest: PathBuf,
        /// Training data output file
        #[arg(long)]
        data: PathBuf,
        /// Directory for aligned patch JPEGs
        #[arg(long)]
        patch_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let x = x.trim().parse().map_err(|e| format!("bad X in {s:?}: {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y in {s:?}: {e}"))?;
    Ok(Point::new(x, y))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = DriverConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract {
            image,
            left,
            right,
            label,
            save_patch,
            data,
        } => extract_command(
            &config,
            &image,
            left,
            right,
            &label,
            save_patch.as_deref(),
            data.as_deref(),
        ),
        Commands::Batch {
            manifest,
            data,
            patch_dir,
        } => batch_command(&config, &manifest, &data, patch_dir.as_deref()),
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn extract_command(
    config: &DriverConfig,
    image: &Path,
    left: Point,
    right: Point,
    label: &str,
    save_patch: Option<&Path>,
    data: Option<&Path>,
) -> Result<()> {
    let mut pipeline = Pipeline::new(config.pipeline.clone())?;
    let source = load_image(image)?;
    let source_rect = Rect::from_size(source.width(), source.height());
    let refs = config.reference_points(left, right);

    let sample = pipeline
        .process(&source, &source_rect, &refs)
        .with_context(|| format!("processing {}", image.display()))?;

    if let Some(out) = save_patch {
        let format = SaveFormat::for_bytes_per_pixel(sample.patch.bytes_per_pixel())
            .context("patch channel count cannot be stored as JPEG")?;
        save_jpeg(
            sample.patch.samples(),
            &pipeline.target_rect(),
            out,
            format,
            config.jpeg_quality,
        )?;
    }

    if let Some(path) = data {
        let mut writer = TrainDataWriter::open_append(path, config.data_mode)?;
        writer.append(&sample.features, label)?;
        writer.finish()?;
    }

    let summary = serde_json::json!({
        "image": image.display().to_string(),
        "mode": pipeline.mode().name(),
        "patch_width": sample.patch.width(),
        "patch_height": sample.patch.height(),
        "feature_len": sample.features.len(),
        "label": label,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn batch_command(
    config: &DriverConfig,
    manifest: &Path,
    data: &Path,
    patch_dir: Option<&Path>,
) -> Result<()> {
    let file = File::open(manifest)
        .with_context(|| format!("opening manifest {}", manifest.display()))?;
    let base_dir = manifest.parent().unwrap_or(Path::new("."));

    if let Some(dir) = patch_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating patch directory {}", dir.display()))?;
    }

    let mut pipeline = Pipeline::new(config.pipeline.clone())?;
    let mut writer = TrainDataWriter::create(data, config.data_mode)?;

    let summary = batch::run_batch(
        BufReader::new(file),
        base_dir,
        config,
        &mut pipeline,
        &mut writer,
        patch_dir,
    )?;
    let records = writer.finish()?;

    tracing::info!(records, data = %data.display(), "training data complete");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("10.5, 20"), Ok(Point::new(10.5, 20.0)));
        assert!(parse_point("10.5").is_err());
        assert!(parse_point("a,2").is_err());
    }

    #[test]
    fn test_cli_parses_extract() {
        let cli = Cli::try_parse_from([
            "facepatch",
            "extract",
            "--image",
            "face.jpg",
            "--left",
            "100,120",
            "--right",
            "160,118",
            "--config",
            "cfg.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        match cli.command {
            Commands::Extract { left, right, label, .. } => {
                assert_eq!(left, Point::new(100.0, 120.0));
                assert_eq!(right, Point::new(160.0, 118.0));
                assert_eq!(label, "");
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn test_extract_appends_to_existing_data() {
        let dir = std::env::temp_dir().join(format!("facepatch-cli-{}-extract", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let image = dir.join("face.jpg");
        let (w, h) = (80usize, 80usize);
        let samples: Vec<u8> = (0..w * h)
            .flat_map(|i| {
                let v = 60 + (((i % w) * 3 + (i / w) * 2) % 120) as u8;
                [v, v / 2 + 10, 255 - v]
            })
            .collect();
        save_jpeg(&samples, &Rect::from_size(w, h), &image, SaveFormat::Rgb8, 90).unwrap();

        let data = dir.join("train.txt");
        let config = DriverConfig::default();
        let (left, right) = (Point::new(25.0, 30.0), Point::new(55.0, 30.0));
        for label in ["first", "second"] {
            extract_command(&config, &image, left, right, label, None, Some(&data)).unwrap();
        }

        let text = std::fs::read_to_string(&data).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        let labels: Vec<&str> = text
            .lines()
            .map(|line| line.split('\t').next().unwrap())
            .collect();
        assert_eq!(labels, ["first", "second"]);
    }
}
