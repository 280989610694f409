//! Per-zoom generalization of feature sets.
//!
//! Every zoom level gets its own reduced-detail copy of the input, built feature
//! by feature:
//!
//! 1. Repeat `iterations` times, stopping early once the geometry is empty:
//!    - Douglas-Peucker with tolerance `resolution`
//!    - snap onto the `resolution` grid anchored at (0, 0) (world units, floor)
//!    - best-effort line merge
//! 2. Drop the feature if nothing survived.
//! 3. Lines and polygons whose total length is at most `resolution` become their
//!    centroid point; length exactly 0 drops the feature. Points are kept as they are.
//!
//! Attributes and ids pass through unchanged. The input set is never modified.
//!
//! # Modes
//!
//! [`GeneralizeMode::Segments`] skips simplification and merging: coordinates are
//! snapped once and features that collapse to zero length are dropped. It suits
//! inputs that are already short segments rather than whole traces.

use std::path::Path;

use geo::{Centroid, Coord, Euclidean, Geometry, GeometryCollection, Length};
use log::{info, trace};
use rayon::prelude::*;
use serde::Deserialize;

use crate::feature::{Feature, FeatureSet};
use crate::merge::merge_lines;
use crate::quantize::snap_to_grid;
use crate::simplify::{remove_repeated_points, simplify_geometry};
use crate::store::FeatureStore;
use crate::tile::TileScheme;
use crate::validate::filter_valid_geometry;
use crate::Result;

/// Generalization grid origin; independent of the tile grid origin
const GRID_ORIGIN: Coord<f64> = Coord { x: 0.0, y: 0.0 };

/// Generalization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneralizeMode {
    /// Simplify, snap and merge, repeated per feature
    #[default]
    Iterative,
    /// Snap only, dropping zero-length results
    Segments,
}

impl std::str::FromStr for GeneralizeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "iterative" => Ok(GeneralizeMode::Iterative),
            "segments" => Ok(GeneralizeMode::Segments),
            other => Err(format!("unknown generalize mode: {}", other)),
        }
    }
}

/// Generalize a feature set for one resolution.
///
/// # Arguments
/// * `features` - Input features, in the working CRS
/// * `resolution` - CRS units per pixel at the target zoom
/// * `iterations` - Simplify/snap/merge rounds per feature
///
/// # Returns
/// A new feature set in the same CRS with dropped features removed and input
/// order kept.
pub fn generalize(features: &FeatureSet, resolution: f64, iterations: usize) -> Result<FeatureSet> {
    let generalized: Vec<Option<Feature>> = features
        .features()
        .par_iter()
        .map(|feature| generalize_feature(feature, resolution, iterations))
        .collect::<Result<_>>()?;

    Ok(collect_survivors(features, generalized))
}

/// Snap-only generalization; features with zero snapped length are dropped
pub fn generalize_segments(features: &FeatureSet, resolution: f64) -> Result<FeatureSet> {
    let snapped: Vec<Option<Feature>> = features
        .features()
        .par_iter()
        .map(|feature| {
            let geometry = snap_geometry(&feature.geometry, resolution)?;
            Ok(geometry
                .filter(|g| planar_length(g) > 0.0)
                .map(|g| feature.with_geometry(g)))
        })
        .collect::<Result<_>>()?;

    Ok(collect_survivors(features, snapped))
}

/// Generalize with the given mode
pub fn generalize_with_mode(
    features: &FeatureSet,
    resolution: f64,
    iterations: usize,
    mode: GeneralizeMode,
) -> Result<FeatureSet> {
    match mode {
        GeneralizeMode::Iterative => generalize(features, resolution, iterations),
        GeneralizeMode::Segments => generalize_segments(features, resolution),
    }
}

fn collect_survivors(input: &FeatureSet, survivors: Vec<Option<Feature>>) -> FeatureSet {
    let kept: Vec<Feature> = survivors.into_iter().flatten().collect();
    if kept.len() < input.len() {
        trace!("Dropped {} of {} features", input.len() - kept.len(), input.len());
    }
    FeatureSet::from_features(input.epsg, kept)
}

/// Generalize one feature; `None` means it was dropped
pub fn generalize_feature(feature: &Feature, resolution: f64, iterations: usize) -> Result<Option<Feature>> {
    let mut geometry = feature.geometry.clone();
    for _ in 0..iterations {
        match generalize_step(&geometry, resolution)? {
            Some(next) => geometry = next,
            None => return Ok(None),
        }
    }

    let geometry = match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => geometry,
        other => {
            let length = planar_length(&other);
            if length == 0.0 {
                return Ok(None);
            }
            if length <= resolution {
                match other.centroid() {
                    Some(centroid) => Geometry::Point(centroid),
                    None => return Ok(None),
                }
            } else {
                other
            }
        }
    };

    Ok(Some(feature.with_geometry(geometry)))
}

/// One simplify/snap/merge round. Collections are generalized member by member.
fn generalize_step(geom: &Geometry<f64>, resolution: f64) -> Result<Option<Geometry<f64>>> {
    if let Geometry::GeometryCollection(gc) = geom {
        let mut members = Vec::with_capacity(gc.0.len());
        for member in &gc.0 {
            if let Some(generalized) = generalize_step(member, resolution)? {
                members.push(generalized);
            }
        }
        return Ok((!members.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection(members))));
    }

    let simplified = simplify_geometry(geom, resolution)?;
    let Some(snapped) = snap_geometry(&simplified, resolution)? else {
        return Ok(None);
    };
    let merged = merge_lines(&snapped);
    if !merged.is_merged() {
        trace!("No line merge for {}", crate::feature::geometry_kind(&snapped));
    }
    Ok(Some(merged.unwrap_or(snapped)))
}

/// Snap to the grid and drop parts that collapsed. `None` when nothing is left.
fn snap_geometry(geom: &Geometry<f64>, resolution: f64) -> Result<Option<Geometry<f64>>> {
    if let Geometry::GeometryCollection(gc) = geom {
        let mut members = Vec::with_capacity(gc.0.len());
        for member in &gc.0 {
            if let Some(snapped) = snap_geometry(member, resolution)? {
                members.push(snapped);
            }
        }
        return Ok((!members.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection(members))));
    }

    let snapped = snap_to_grid(geom, GRID_ORIGIN, resolution)?;
    let deduped = remove_repeated_points(&snapped)?;
    Ok(filter_valid_geometry(&deduped))
}

/// Total planar length: sum of segment lengths for lines, ring perimeters for
/// polygons, 0 for points.
pub fn planar_length(geom: &Geometry<f64>) -> f64 {
    fn polygon_length(poly: &geo::Polygon<f64>) -> f64 {
        poly.exterior().length::<Euclidean>()
            + poly.interiors().iter().map(|r| r.length::<Euclidean>()).sum::<f64>()
    }

    match geom {
        Geometry::Point(_) | Geometry::MultiPoint(_) => 0.0,
        Geometry::Line(line) => line.length::<Euclidean>(),
        Geometry::LineString(ls) => ls.length::<Euclidean>(),
        Geometry::MultiLineString(mls) => mls.length::<Euclidean>(),
        Geometry::Polygon(poly) => polygon_length(poly),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(polygon_length).sum(),
        Geometry::Rect(rect) => polygon_length(&rect.to_polygon()),
        Geometry::Triangle(tri) => polygon_length(&tri.to_polygon()),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(planar_length).sum(),
    }
}

/// Generalize a stored dataset once per zoom level.
///
/// Reads `input` once, then writes one dataset per zoom at `<output_prefix><z>`,
/// split into layers by geometry kind. Zoom levels run in parallel.
pub fn generalize_zoom_range<S: FeatureStore + ?Sized>(
    store: &S,
    input: &Path,
    output_prefix: &str,
    scheme: &TileScheme,
    iterations: usize,
    mode: GeneralizeMode,
) -> Result<()> {
    scheme.validate()?;
    let features = store.read(input, None)?;
    info!(
        "Generalizing {} features from {} over zooms {}..={}",
        features.len(),
        input.display(),
        scheme.min_zoom,
        scheme.max_zoom
    );

    let zooms: Vec<u8> = scheme.zooms().collect();
    zooms.par_iter().try_for_each(|&z| {
        let resolution = scheme.resolution(z);
        let generalized = generalize_with_mode(&features, resolution, iterations, mode)?;
        let output = format!("{}{}", output_prefix, z);
        let layers = store.write_by_kind(&generalized, Path::new(&output))?;
        info!(
            "Zoom {}: {} of {} features kept (resolution {}), layers {:?}",
            z,
            generalized.len(),
            features.len(),
            resolution,
            layers
        );
        Ok(())
    })
}
