//! Tile engine - wires together the spatial index, clipping, quantization and tile output.
//!
//! For one zoom level of one feature set:
//! 1. Cover the dataset bounding box with the tile range at that zoom
//! 2. Build a [`SpatialIndex`] over the features
//! 3. For each tile, in parallel:
//!    - query the index for candidate features
//!    - clip each candidate to the half-open tile box; mixed results keep only
//!      their line components
//!    - quantize to tile-local integer coordinates at `resolution(z)`, clamped
//!      into `[0, tile_size)`
//!    - drop consecutive duplicates and collinear vertices; skip if degenerate
//!    - best-effort line merge, then round to integers
//! 4. Write every tile with at least one feature; empty tiles are never written.
//!
//! A failing feature is logged and skipped without affecting the rest of its tile,
//! and a failed tile write does not stop other tiles. Geometry-kind errors are
//! coverage bugs and abort the run.

use std::ops::{Add, AddAssign};

use geo::Geometry;
use log::{info, trace, warn};
use rayon::prelude::*;

use crate::clip::{clip_geometry, extract_linear_components};
use crate::document::{TileDocument, TileDocumentBuilder};
use crate::feature::{Feature, FeatureSet};
use crate::merge::merge_lines;
use crate::quantize::{clamp_to_tile, quantize, round_coordinates};
use crate::simplify::simplify_tile_geometry;
use crate::sink::TileSink;
use crate::spatial_index::SpatialIndex;
use crate::tile::{TileBounds, TileCoord, TileRange, TileScheme};
use crate::validate::filter_valid_geometry;
use crate::Result;

/// Counters for one tiling run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileStats {
    /// Tiles in the range covering the dataset
    pub candidate_tiles: usize,
    /// Tiles written to the sink
    pub written_tiles: usize,
    /// Tile features written, summed over tiles
    pub features_emitted: usize,
    /// Candidate features skipped after a failure in clip/quantize/encode
    pub features_skipped: usize,
    /// Tiles whose write failed
    pub failed_tiles: usize,
}

impl Add for TileStats {
    type Output = TileStats;

    fn add(self, other: TileStats) -> TileStats {
        TileStats {
            candidate_tiles: self.candidate_tiles + other.candidate_tiles,
            written_tiles: self.written_tiles + other.written_tiles,
            features_emitted: self.features_emitted + other.features_emitted,
            features_skipped: self.features_skipped + other.features_skipped,
            failed_tiles: self.failed_tiles + other.failed_tiles,
        }
    }
}

impl AddAssign for TileStats {
    fn add_assign(&mut self, other: TileStats) {
        *self = *self + other;
    }
}

/// A non-empty tile ready for the sink
#[derive(Debug, Clone)]
pub struct GeneratedTile {
    pub coord: TileCoord,
    pub document: TileDocument,
    /// Candidate features skipped after a non-fatal failure
    pub skipped: usize,
}

/// Tiles one feature set against one tile scheme
pub struct TileEngine<'a> {
    features: &'a FeatureSet,
    scheme: &'a TileScheme,
    index: SpatialIndex,
}

impl<'a> TileEngine<'a> {
    /// Build the spatial index for `features`.
    pub fn new(features: &'a FeatureSet, scheme: &'a TileScheme) -> Self {
        Self {
            features,
            scheme,
            index: SpatialIndex::build(features.features()),
        }
    }

    /// Tiles covering the dataset bounding box at zoom `z`
    pub fn tile_range(&self, z: u8) -> TileRange {
        self.scheme.tile_range(&self.features.bounds(), z)
    }

    /// Clip, quantize and collect the features of one tile.
    ///
    /// # Returns
    ///
    /// `None` when no feature has a non-empty part inside the tile.
    pub fn process_tile(&self, coord: TileCoord) -> Result<Option<GeneratedTile>> {
        let bounds = self.scheme.tile_bounds(coord);
        let resolution = self.scheme.resolution(coord.z);
        let mut builder = TileDocumentBuilder::new(self.features.epsg);
        let mut skipped = 0;

        for position in self.index.query(&bounds) {
            let feature = &self.features.features()[position];
            match tile_feature(feature, &bounds, resolution, self.scheme.tile_size)
                .and_then(|geom| match geom {
                    Some(g) => builder.add_feature(feature.id, &g, &feature.attributes),
                    None => Ok(()),
                }) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!("Tile {}: skipping feature {}: {}", coord, feature.id, err);
                    skipped += 1;
                }
            }
        }

        if builder.is_empty() {
            return Ok(None);
        }

        Ok(Some(GeneratedTile {
            coord,
            document: builder.build(),
            skipped,
        }))
    }

    /// Tile zoom `z` into `sink`.
    ///
    /// Tiles are processed in parallel. A failed tile write is logged and counted;
    /// a fatal error aborts and is returned.
    pub fn run(&self, z: u8, sink: &dyn TileSink) -> Result<TileStats> {
        let range = self.tile_range(z);
        let coords: Vec<TileCoord> = range.iter().collect();

        let per_tile: Vec<TileStats> = coords
            .par_iter()
            .map(|&coord| self.emit_tile(coord, sink))
            .collect::<Result<_>>()?;

        let mut stats = per_tile.into_iter().fold(TileStats::default(), |a, b| a + b);
        stats.candidate_tiles = range.len();

        info!(
            "Zoom {}: {} of {} candidate tiles written, {} features ({} skipped, {} failed tiles)",
            z,
            stats.written_tiles,
            stats.candidate_tiles,
            stats.features_emitted,
            stats.features_skipped,
            stats.failed_tiles
        );
        Ok(stats)
    }

    fn emit_tile(&self, coord: TileCoord, sink: &dyn TileSink) -> Result<TileStats> {
        let Some(tile) = self.process_tile(coord)? else {
            trace!("Tile {} is empty", coord);
            return Ok(TileStats::default());
        };

        let mut stats = TileStats {
            features_skipped: tile.skipped,
            ..TileStats::default()
        };
        match sink.write_tile(coord, &tile.document) {
            Ok(()) => {
                stats.written_tiles = 1;
                stats.features_emitted = tile.document.len();
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("Failed to write tile {}: {}", coord, err);
                stats.failed_tiles = 1;
            }
        }
        Ok(stats)
    }
}

/// Tile one zoom level of a feature set into a sink
pub fn tile(features: &FeatureSet, scheme: &TileScheme, z: u8, sink: &dyn TileSink) -> Result<TileStats> {
    TileEngine::new(features, scheme).run(z, sink)
}

/// Produce the tile-local geometry of one feature in one tile.
///
/// # Arguments
/// * `feature` - Source feature in world coordinates
/// * `bounds` - Tile bounding box (max edges exclusive)
/// * `resolution` - World units per tile-local unit at this zoom
/// * `tile_size` - Tile edge in local units; local coordinates stay below it
///
/// # Returns
/// `None` when nothing of the feature survives in this tile.
pub fn tile_feature(
    feature: &Feature,
    bounds: &TileBounds,
    resolution: f64,
    tile_size: u32,
) -> Result<Option<Geometry<f64>>> {
    let Some(clipped) = clip_geometry(&feature.geometry, bounds) else {
        return Ok(None);
    };

    // Clipping artifacts of other dimensions are dropped
    let clipped = match clipped {
        Geometry::GeometryCollection(gc) => match extract_linear_components(&gc) {
            Some(lines) => lines,
            None => {
                trace!("Feature {}: no line components in clipped collection", feature.id);
                return Ok(None);
            }
        },
        other => other,
    };

    let local = clamp_to_tile(&quantize(&clipped, bounds.min(), resolution)?, tile_size)?;
    let cleaned = simplify_tile_geometry(&local)?;
    let Some(valid) = filter_valid_geometry(&cleaned) else {
        return Ok(None);
    };
    let merged = merge_lines(&valid).unwrap_or(valid);
    Ok(Some(round_coordinates(&merged)?))
}
