//! CLI for trace-tiles - build tiled GeoJSON pyramids from GPS trace datasets
//!
//! This is a thin wrapper around the trace-tiles-core library.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use trace_tiles_core::generalize::generalize_zoom_range;
use trace_tiles_core::pyramid::{build_from_features, build_pyramid, PyramidReport};
use trace_tiles_core::sink::DirectorySink;
use trace_tiles_core::store::{FeatureStore, GeoJsonStore};
use trace_tiles_core::{Error, GeneralizeMode, PyramidConfig};

/// Layers read as tile input by default
const TILE_LAYERS: &str = "point,multipoint,linestring,multilinestring";

#[derive(Parser, Debug)]
#[command(
    name = "trace-tiles",
    about = "Generalize GPS traces and cut them into a tiled GeoJSON pyramid",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one generalized dataset per zoom level
    Generalize {
        /// Input dataset directory (one <layer>.geojson per layer)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Prefix of the per-zoom output datasets; zoom z goes to <PREFIX><z>
        #[arg(long, default_value = "traces_")]
        output_prefix: String,

        #[command(flatten)]
        pyramid: PyramidArgs,
    },

    /// Tile per-zoom datasets written by `generalize`
    Tile {
        /// Prefix of the per-zoom input datasets
        #[arg(long, default_value = "traces_")]
        input_prefix: String,

        /// Comma-separated layers to read from each dataset
        #[arg(long, default_value = TILE_LAYERS)]
        layers: String,

        #[command(flatten)]
        pyramid: PyramidArgs,
    },

    /// Generalize in memory and tile in one run
    Build {
        /// Input dataset directory (one <layer>.geojson per layer)
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        pyramid: PyramidArgs,
    },
}

/// Pyramid settings; flags override values from `--config`
#[derive(Args, Debug)]
struct PyramidArgs {
    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum zoom level
    #[arg(long)]
    min_zoom: Option<u8>,

    /// Maximum zoom level
    #[arg(long)]
    max_zoom: Option<u8>,

    /// Grid origin x in CRS units
    #[arg(long, allow_hyphen_values = true)]
    origin_x: Option<f64>,

    /// Grid origin y in CRS units
    #[arg(long, allow_hyphen_values = true)]
    origin_y: Option<f64>,

    /// Tile edge length in pixels
    #[arg(long)]
    tile_size: Option<u32>,

    /// CRS units per pixel at zoom 0
    #[arg(long)]
    resolution: Option<f64>,

    /// EPSG code of the working CRS
    #[arg(long)]
    epsg: Option<u32>,

    /// Simplification rounds per feature
    #[arg(long)]
    iterations: Option<usize>,

    /// Generalization mode (iterative, segments)
    #[arg(long)]
    mode: Option<GeneralizeMode>,

    /// Pyramid root directory
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl PyramidArgs {
    fn resolve(&self) -> Result<PyramidConfig> {
        let mut config = match &self.config {
            Some(path) => PyramidConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PyramidConfig::default(),
        };

        if let Some(z) = self.min_zoom {
            config.scheme.min_zoom = z;
        }
        if let Some(z) = self.max_zoom {
            config.scheme.max_zoom = z;
        }
        if let Some(x) = self.origin_x {
            config.scheme.origin_x = x;
        }
        if let Some(y) = self.origin_y {
            config.scheme.origin_y = y;
        }
        if let Some(size) = self.tile_size {
            config = config.with_tile_size(size);
        }
        if let Some(resolution) = self.resolution {
            config = config.with_resolution_0(resolution);
        }
        if let Some(epsg) = self.epsg {
            config = config.with_epsg(epsg);
        }
        if let Some(iterations) = self.iterations {
            config = config.with_iterations(iterations);
        }
        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }
        if let Some(output) = &self.output {
            config = config.with_output(output);
        }

        config.validate().context("Invalid pyramid configuration")?;
        Ok(config)
    }
}

fn report_summary(report: &PyramidReport, output: &Path) {
    let total = report.total();
    println!(
        "✓ Wrote {} tiles ({} features) to {}",
        total.written_tiles,
        total.features_emitted,
        output.display()
    );
    if total.failed_tiles > 0 || !report.failed_zooms.is_empty() {
        println!(
            "  {} tiles failed, zooms failed: {:?}",
            total.failed_tiles, report.failed_zooms
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let store = GeoJsonStore::new();

    match cli.command {
        Command::Generalize {
            input,
            output_prefix,
            pyramid,
        } => {
            let config = pyramid.resolve()?;
            generalize_zoom_range(
                &store,
                &input,
                &output_prefix,
                &config.scheme,
                config.iterations,
                config.mode,
            )
            .with_context(|| format!("Failed to generalize {}", input.display()))?;
            println!(
                "✓ Generalized {} into {}{}..{}",
                input.display(),
                output_prefix,
                config.scheme.min_zoom,
                config.scheme.max_zoom
            );
        }

        Command::Tile {
            input_prefix,
            layers,
            pyramid,
        } => {
            let config = pyramid.resolve()?;
            let layers: Vec<&str> = layers.split(',').map(str::trim).filter(|l| !l.is_empty()).collect();
            let sink = DirectorySink::new(&config.output);
            let report = build_pyramid(
                |z| {
                    let dataset = format!("{}{}", input_prefix, z);
                    let features = store.read(Path::new(&dataset), Some(layers.as_slice()))?;
                    if !features.is_empty() && features.epsg != config.epsg {
                        return Err(Error::InvalidConfig(format!(
                            "{} is in EPSG:{} but the pyramid is configured for EPSG:{}",
                            dataset, features.epsg, config.epsg
                        )));
                    }
                    info!("Zoom {}: {} features from {}", z, features.len(), dataset);
                    Ok(features)
                },
                &config.scheme,
                &sink,
            )
            .with_context(|| format!("Failed to tile {}<z>", input_prefix))?;
            report_summary(&report, &config.output);
        }

        Command::Build { input, pyramid } => {
            let config = pyramid.resolve()?;
            let features = store
                .read(&input, None)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            info!("Read {} features from {}", features.len(), input.display());
            let sink = DirectorySink::new(&config.output);
            let report = build_from_features(&features, &config, &sink)
                .with_context(|| format!("Failed to build pyramid from {}", input.display()))?;
            report_summary(&report, &config.output);
        }
    }

    Ok(())
}
