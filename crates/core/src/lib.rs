//! Core library for turning GPS trace feature sets into tiled GeoJSON pyramids.
//!
//! The engine runs in two stages that share one resolution law and one
//! quantization primitive:
//!
//! 1. **Generalization** ([`generalize`]): one reduced-detail [`FeatureSet`] per zoom
//!    level, built by iterated Douglas-Peucker simplification, grid snapping and
//!    line merging.
//! 2. **Tiling** ([`pipeline`]): each zoom's feature set is partitioned into a grid
//!    of tiles; every non-empty tile is clipped, quantized to tile-local integer
//!    coordinates and written through a [`TileSink`](sink::TileSink).
//!
//! [`pyramid::build_pyramid`] sequences both stages over a zoom range and writes
//! the single `metadata.json` record describing the grid.
//!
//! # Examples
//!
//! ```no_run
//! use trace_tiles_core::pyramid::build_pyramid;
//! use trace_tiles_core::sink::DirectorySink;
//! use trace_tiles_core::store::{FeatureStore, GeoJsonStore};
//! use trace_tiles_core::PyramidConfig;
//!
//! let config = PyramidConfig::default().with_zoom_range(3, 15);
//! let store = GeoJsonStore::new();
//! let sink = DirectorySink::new(&config.output);
//!
//! build_pyramid(
//!     |z| store.read(format!("traces_{}", z).as_ref(), Some(&["point", "linestring"])),
//!     &config.scheme,
//!     &sink,
//! )
//! .unwrap();
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub mod clip;
pub mod document;
pub mod feature;
pub mod generalize;
pub mod merge;
pub mod pipeline;
pub mod pyramid;
pub mod quantize;
pub mod simplify;
pub mod sink;
pub mod spatial_index;
pub mod store;
pub mod tile;
pub mod validate;

pub use feature::{AttributeKind, AttributeValue, Attributes, Feature, FeatureSet};
pub use generalize::GeneralizeMode;
pub use pipeline::TileStats;
pub use pyramid::{PyramidMetadata, PyramidReport};
pub use tile::{TileBounds, TileCoord, TileScheme};

/// Errors that can occur while generalizing or tiling a feature set
#[derive(Error, Debug)]
pub enum Error {
    /// A geometry kind reached a stage that has no handling for it.
    #[error("Unsupported geometry kind {kind} in {operation}")]
    GeometryKind {
        operation: &'static str,
        kind: &'static str,
    },

    /// A single source record could not be converted into a feature.
    #[error("Failed to ingest feature {feature}: {reason}")]
    FeatureIngest { feature: String, reason: String },

    /// Read or write failure against a feature store or tile sink.
    #[error("Store I/O failed for {path}: {reason}")]
    StoreIo { path: PathBuf, reason: String },

    #[error("Attribute {attribute} of feature {feature} is {found}, expected {expected}")]
    Schema {
        attribute: String,
        expected: AttributeKind,
        found: AttributeKind,
        feature: u64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an I/O failure on a store or sink path
    pub fn store_io(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Error::StoreIo {
            path: path.as_ref().to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// Geometry-kind errors are coverage bugs and always abort. Ingest errors only
    /// ever cost one feature.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::GeometryKind { .. } | Error::InvalidConfig(_) => true,
            Error::FeatureIngest { .. } => false,
            Error::StoreIo { .. } | Error::Schema { .. } | Error::Io(_) | Error::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default number of simplify/snap/merge rounds per feature
pub const DEFAULT_ITERATIONS: usize = 5;

/// Default working and output CRS (Web Mercator)
pub const DEFAULT_EPSG: u32 = 3857;

/// Configuration for a pyramid build
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Tile grid shared by all zoom levels
    #[serde(flatten)]
    pub scheme: TileScheme,
    /// EPSG code of the working/output CRS
    pub epsg: u32,
    /// Simplification rounds per feature in the Generalizer
    pub iterations: usize,
    /// Generalization strategy
    pub mode: GeneralizeMode,
    /// Pyramid root directory
    pub output: PathBuf,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            scheme: TileScheme::default(),
            epsg: DEFAULT_EPSG,
            iterations: DEFAULT_ITERATIONS,
            mode: GeneralizeMode::default(),
            output: PathBuf::from("tiled"),
        }
    }
}

impl PyramidConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::store_io(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheme.validate()
    }

    /// Set the zoom range.
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.scheme.min_zoom = min_zoom;
        self.scheme.max_zoom = max_zoom;
        self
    }

    /// Set the grid origin.
    pub fn with_origin(mut self, origin_x: f64, origin_y: f64) -> Self {
        self.scheme.origin_x = origin_x;
        self.scheme.origin_y = origin_y;
        self
    }

    /// Set the tile size in pixels.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.scheme.tile_size = tile_size;
        self
    }

    /// Set the zoom 0 resolution.
    pub fn with_resolution_0(mut self, resolution_0: f64) -> Self {
        self.scheme.resolution_0 = resolution_0;
        self
    }

    /// Set the CRS code.
    pub fn with_epsg(mut self, epsg: u32) -> Self {
        self.epsg = epsg;
        self
    }

    /// Set the simplification iteration count.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the generalization mode.
    pub fn with_mode(mut self, mode: GeneralizeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the output root.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }
}
