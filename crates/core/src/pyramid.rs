//! Pyramid driver: runs the tile engine over a zoom range and records the grid.
//!
//! The pyramid on disk is a metadata record plus whichever tiles exist. There is
//! no tile index; a missing tile file means the tile is empty.
//!
//! Zoom levels are independent and run in parallel. A zoom whose input cannot be
//! produced, or whose tiling fails, is logged and reported while the remaining
//! zooms continue. Failing to write the metadata record, or a fatal error in any
//! zoom, aborts the run.

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::feature::FeatureSet;
use crate::generalize::generalize_with_mode;
use crate::pipeline::{TileEngine, TileStats};
use crate::sink::TileSink;
use crate::tile::TileScheme;
use crate::{Error, PyramidConfig, Result};

/// Grid description written once per pyramid as `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidMetadata {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// CRS units per pixel at zoom 0
    pub resolution_0: f64,
    pub z_min: u8,
    pub z_max: u8,
}

impl PyramidMetadata {
    pub fn from_scheme(scheme: &TileScheme) -> Self {
        Self {
            origin_x: scheme.origin_x,
            origin_y: scheme.origin_y,
            tile_size: scheme.tile_size,
            resolution_0: scheme.resolution_0,
            z_min: scheme.min_zoom,
            z_max: scheme.max_zoom,
        }
    }

    /// The tile scheme a client needs to place tile-local coordinates
    pub fn to_scheme(&self) -> Result<TileScheme> {
        TileScheme::new(
            self.origin_x,
            self.origin_y,
            self.tile_size,
            self.resolution_0,
            self.z_min,
            self.z_max,
        )
    }
}

/// Outcome of a pyramid build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PyramidReport {
    /// Stats of every zoom that completed, ascending by zoom
    pub zooms: Vec<(u8, TileStats)>,
    /// Zooms skipped after a non-fatal error, ascending
    pub failed_zooms: Vec<u8>,
}

impl PyramidReport {
    /// Stats summed over all completed zooms
    pub fn total(&self) -> TileStats {
        self.zooms
            .iter()
            .fold(TileStats::default(), |total, (_, stats)| total + *stats)
    }

    pub fn stats(&self, z: u8) -> Option<TileStats> {
        self.zooms.iter().find(|(zoom, _)| *zoom == z).map(|(_, s)| *s)
    }
}

/// Build a tile pyramid.
///
/// # Arguments
/// * `provider` - Produces the feature set for a zoom level; called once per zoom,
///   possibly from several threads
/// * `scheme` - Tile grid and zoom range
/// * `sink` - Destination for tiles and metadata
///
/// # Returns
/// Per-zoom stats, or the first fatal error.
pub fn build_pyramid<P>(provider: P, scheme: &TileScheme, sink: &dyn TileSink) -> Result<PyramidReport>
where
    P: Fn(u8) -> Result<FeatureSet> + Sync,
{
    scheme.validate()?;
    sink.write_metadata(&PyramidMetadata::from_scheme(scheme))?;

    let zooms: Vec<u8> = scheme.zooms().collect();
    let outcomes: Vec<(u8, Option<TileStats>)> = zooms
        .par_iter()
        .map(|&z| {
            let stats = provider(z).and_then(|features| TileEngine::new(&features, scheme).run(z, sink));
            match stats {
                Ok(stats) => Ok((z, Some(stats))),
                Err(err) if err.is_fatal() => Err(err),
                Err(err) => {
                    warn!("Zoom {} failed: {}", z, err);
                    Ok((z, None))
                }
            }
        })
        .collect::<Result<_>>()?;

    let mut report = PyramidReport::default();
    for (z, stats) in outcomes {
        match stats {
            Some(stats) => report.zooms.push((z, stats)),
            None => report.failed_zooms.push(z),
        }
    }

    let total = report.total();
    info!(
        "Pyramid zooms {}..={}: {} tiles, {} features, {} failed tiles, {} failed zooms",
        scheme.min_zoom,
        scheme.max_zoom,
        total.written_tiles,
        total.features_emitted,
        total.failed_tiles,
        report.failed_zooms.len()
    );
    Ok(report)
}

/// Generalize `features` per zoom in memory and tile each result.
///
/// The features must already be in the configured CRS; nothing is reprojected.
pub fn build_from_features(features: &FeatureSet, config: &PyramidConfig, sink: &dyn TileSink) -> Result<PyramidReport> {
    config.validate()?;
    if features.epsg != config.epsg {
        return Err(Error::InvalidConfig(format!(
            "input is in EPSG:{} but the pyramid is configured for EPSG:{}",
            features.epsg, config.epsg
        )));
    }
    let scheme = &config.scheme;
    build_pyramid(
        |z| generalize_with_mode(features, scheme.resolution(z), config.iterations, config.mode),
        scheme,
        sink,
    )
}
