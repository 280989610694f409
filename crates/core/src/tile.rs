//! Tile scheme math and utilities
//!
//! This module defines the planar tile grid used by the pyramid: an origin in the
//! working CRS, a tile edge length in pixels, and a baseline resolution at zoom 0.
//! Every zoom step halves the resolution, so a tile at zoom `z` covers
//! `tile_size * resolution_0 / 2^z` CRS units on each side.
//!
//! Tiles are half-open boxes: `[x_min, x_max) × [y_min, y_max)`. A coordinate that
//! lies exactly on a shared edge belongs to the tile whose minimum corner it is.

use std::ops::RangeInclusive;

use geo::{BoundingRect, Coord, Geometry};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Highest zoom level accepted by [`TileScheme::new`]
pub const MAX_ZOOM: u8 = 30;

/// Tile coordinates: column, row, and zoom level
///
/// Columns and rows are counted from the scheme origin and may be negative for
/// data lying below or left of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    /// Create a new tile coordinate
    pub fn new(x: i64, y: i64, z: u8) -> Self {
        Self { z, x, y }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Axis-aligned bounding box in working CRS units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl TileBounds {
    /// Create a new bounding box
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Create an empty/invalid bounding box
    pub fn empty() -> Self {
        Self {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    /// Bounding box of a geometry, `None` for geometries without coordinates
    pub fn of_geometry(geom: &Geometry<f64>) -> Option<Self> {
        geom.bounding_rect().map(|rect| {
            Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
        })
    }

    /// Check if this is a valid bounding box
    pub fn is_valid(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max
    }

    /// Expand this bounding box to include another
    pub fn expand(&mut self, other: &Self) {
        self.x_min = self.x_min.min(other.x_min);
        self.y_min = self.y_min.min(other.y_min);
        self.x_max = self.x_max.max(other.x_max);
        self.y_max = self.y_max.max(other.y_max);
    }

    /// Closed-box overlap test (touching edges count as intersecting)
    pub fn intersects(&self, other: &Self) -> bool {
        self.x_min <= other.x_max
            && other.x_min <= self.x_max
            && self.y_min <= other.y_max
            && other.y_min <= self.y_max
    }

    /// Minimum corner
    pub fn min(&self) -> Coord<f64> {
        Coord {
            x: self.x_min,
            y: self.y_min,
        }
    }
}

/// Immutable description of the tile grid shared by every zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileScheme {
    /// Grid origin, x (working CRS units)
    pub origin_x: f64,
    /// Grid origin, y (working CRS units)
    pub origin_y: f64,
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// CRS units per pixel at zoom 0
    pub resolution_0: f64,
    /// Minimum zoom level to generate
    pub min_zoom: u8,
    /// Maximum zoom level to generate
    pub max_zoom: u8,
}

impl Default for TileScheme {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            tile_size: 256,
            resolution_0: 250_000.0,
            min_zoom: 1,
            max_zoom: 10,
        }
    }
}

impl TileScheme {
    /// Create a validated tile scheme
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        tile_size: u32,
        resolution_0: f64,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<Self> {
        let scheme = Self {
            origin_x,
            origin_y,
            tile_size,
            resolution_0,
            min_zoom,
            max_zoom,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Check the scheme invariants
    pub fn validate(&self) -> Result<()> {
        if !self.origin_x.is_finite() || !self.origin_y.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "origin must be finite, got ({}, {})",
                self.origin_x, self.origin_y
            )));
        }
        if self.tile_size == 0 {
            return Err(Error::InvalidConfig("tile_size must be positive".to_string()));
        }
        if !(self.resolution_0.is_finite() && self.resolution_0 > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "resolution_0 must be finite and positive, got {}",
                self.resolution_0
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(Error::InvalidConfig(format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(Error::InvalidConfig(format!(
                "max_zoom {} exceeds {}",
                self.max_zoom, MAX_ZOOM
            )));
        }
        Ok(())
    }

    /// Zoom levels covered by the pyramid
    pub fn zooms(&self) -> RangeInclusive<u8> {
        self.min_zoom..=self.max_zoom
    }

    /// Grid origin as a coordinate
    pub fn origin(&self) -> Coord<f64> {
        Coord {
            x: self.origin_x,
            y: self.origin_y,
        }
    }

    /// CRS units per pixel at zoom `z`: `resolution_0 / 2^z`.
    ///
    /// Always computed from `resolution_0` directly. Dividing by a power of two is
    /// exact in binary floating point, so `resolution(z + 1) == resolution(z) / 2`.
    pub fn resolution(&self, z: u8) -> f64 {
        self.resolution_0 / 2_f64.powi(z as i32)
    }

    /// Tile edge length in CRS units at zoom `z`: `tile_size * resolution(z)`.
    pub fn tile_extent(&self, z: u8) -> f64 {
        self.tile_size as f64 * self.resolution(z)
    }

    /// Bounding box of a tile in CRS units (max edges are exclusive)
    pub fn tile_bounds(&self, coord: TileCoord) -> TileBounds {
        let size = self.tile_extent(coord.z);
        TileBounds {
            x_min: self.origin_x + coord.x as f64 * size,
            y_min: self.origin_y + coord.y as f64 * size,
            x_max: self.origin_x + (coord.x + 1) as f64 * size,
            y_max: self.origin_y + (coord.y + 1) as f64 * size,
        }
    }

    /// Tile containing a CRS coordinate at zoom `z`.
    ///
    /// A coordinate on a tile edge goes to the tile starting there. The index is
    /// checked against the edges [`tile_bounds`](Self::tile_bounds) produces, so
    /// the two always agree even where `(x - origin) / size` rounds across an edge.
    pub fn tile_for_coord(&self, x: f64, y: f64, z: u8) -> TileCoord {
        let size = self.tile_extent(z);
        TileCoord::new(
            axis_index(x, self.origin_x, size),
            axis_index(y, self.origin_y, size),
            z,
        )
    }

    /// Range of tiles covering a bounding box at zoom `z`
    pub fn tile_range(&self, bbox: &TileBounds, z: u8) -> TileRange {
        if !bbox.is_valid() {
            return TileRange::empty(z);
        }
        let min = self.tile_for_coord(bbox.x_min, bbox.y_min, z);
        let max = self.tile_for_coord(bbox.x_max, bbox.y_max, z);
        TileRange {
            z,
            min_x: min.x,
            max_x: max.x + 1,
            min_y: min.y,
            max_y: max.y + 1,
        }
    }

    /// Convert tile-local integer coordinates back to world coordinates:
    /// `origin + (tile_index * tile_size + local) * resolution(z)`.
    pub fn tile_to_world(&self, coord: TileCoord, local_x: i64, local_y: i64) -> Coord<f64> {
        let r = self.resolution(coord.z);
        let t = self.tile_size as i64;
        Coord {
            x: self.origin_x + (coord.x * t + local_x) as f64 * r,
            y: self.origin_y + (coord.y * t + local_y) as f64 * r,
        }
    }
}

/// Index `k` with `origin + k * size <= v < origin + (k + 1) * size`, evaluated
/// exactly as [`TileScheme::tile_bounds`] evaluates edges.
fn axis_index(v: f64, origin: f64, size: f64) -> i64 {
    let raw = ((v - origin) / size).floor();
    if !(raw.abs() < 9.0e15) {
        // Non-finite or beyond exact integers; nothing to refine
        return raw as i64;
    }
    let edge = |k: i64| origin + k as f64 * size;
    let mut k = raw as i64;
    // floor() is off by at most one tile; edges are monotonic in k
    while edge(k) > v {
        k -= 1;
    }
    while edge(k + 1) <= v {
        k += 1;
    }
    k
}

/// Half-open rectangle of tile indices at one zoom: `[min_x, max_x) × [min_y, max_y)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: u8,
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl TileRange {
    /// A range that yields no tiles
    pub fn empty(z: u8) -> Self {
        Self {
            z,
            min_x: 0,
            max_x: 0,
            min_y: 0,
            max_y: 0,
        }
    }

    /// Number of tiles in the range
    pub fn len(&self) -> usize {
        let w = (self.max_x - self.min_x).max(0) as usize;
        let h = (self.max_y - self.min_y).max(0) as usize;
        w * h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate tiles column by column
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> {
        let TileRange {
            z,
            min_x,
            max_x,
            min_y,
            max_y,
        } = *self;
        (min_x..max_x).flat_map(move |x| (min_y..max_y).map(move |y| TileCoord::new(x, y, z)))
    }
}

/// Get all tiles that intersect a bounding box at a given zoom level
pub fn tiles_for_bbox(
    scheme: &TileScheme,
    bbox: &TileBounds,
    zoom: u8,
) -> impl Iterator<Item = TileCoord> {
    scheme.tile_range(bbox, zoom).iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme(tile_size: u32, resolution_0: f64) -> TileScheme {
        TileScheme::new(0.0, 0.0, tile_size, resolution_0, 0, 20).unwrap()
    }

    #[test]
    fn test_resolution_halves_exactly() {
        let scheme = TileScheme::new(-9_000_000.0, -6_000_000.0, 256, 250_000.0, 0, 30).unwrap();
        for z in 0..30 {
            assert_eq!(scheme.resolution(z + 1), scheme.resolution(z) / 2.0);
            assert_eq!(scheme.tile_extent(z + 1), scheme.tile_extent(z) / 2.0);
        }
        assert_eq!(scheme.tile_extent(0), 256.0 * 250_000.0);
    }

    #[test]
    fn test_tile_bounds() {
        let scheme = scheme(10, 10.0);
        let bounds = scheme.tile_bounds(TileCoord::new(1, 2, 0));
        assert_eq!(bounds, TileBounds::new(100.0, 200.0, 200.0, 300.0));

        let bounds = scheme.tile_bounds(TileCoord::new(-1, 0, 1));
        assert_eq!(bounds, TileBounds::new(-50.0, 0.0, 0.0, 50.0));
    }

    #[test]
    fn test_tile_for_coord_boundary_goes_to_upper_tile() {
        let scheme = scheme(10, 10.0);
        assert_eq!(scheme.tile_for_coord(100.0, 0.0, 0), TileCoord::new(1, 0, 0));
        assert_eq!(scheme.tile_for_coord(99.999, 0.0, 0), TileCoord::new(0, 0, 0));
        assert_eq!(scheme.tile_for_coord(-0.5, -100.0, 0), TileCoord::new(-1, -1, 0));
    }

    #[test]
    fn test_tile_for_coord_agrees_with_tile_bounds() {
        // Flooring (x_min - origin) / size gives 3534 for this tile's own min edge
        let scheme = TileScheme::new(-8270648.205435034, 0.0, 256, 12.345, 0, 20).unwrap();
        let coord = TileCoord::new(3535, 0, 5);
        let bounds = scheme.tile_bounds(coord);
        assert_eq!(scheme.tile_for_coord(bounds.x_min, bounds.y_min, 5), coord);

        for k in [-7_i64, -1, 0, 1, 17, 3534, 3535, 3536] {
            let b = scheme.tile_bounds(TileCoord::new(k, k, 5));
            assert_eq!(scheme.tile_for_coord(b.x_min, b.y_min, 5), TileCoord::new(k, k, 5));
            let inner = crate::clip::next_down(b.x_max);
            let inner_y = crate::clip::next_down(b.y_max);
            assert_eq!(scheme.tile_for_coord(inner, inner_y, 5), TileCoord::new(k, k, 5));
        }
    }

    #[test]
    fn test_tile_range_covers_bbox() {
        let scheme = scheme(10, 10.0);
        let range = scheme.tile_range(&TileBounds::new(0.0, 0.0, 300.0, 300.0), 0);
        assert_eq!(range.min_x, 0);
        assert_eq!(range.max_x, 4);
        assert_eq!(range.len(), 16);

        let tiles: Vec<_> = range.iter().collect();
        assert_eq!(tiles.first(), Some(&TileCoord::new(0, 0, 0)));
        assert_eq!(tiles.last(), Some(&TileCoord::new(3, 3, 0)));
    }

    #[test]
    fn test_tile_range_empty_bbox() {
        let scheme = scheme(10, 10.0);
        let range = scheme.tile_range(&TileBounds::empty(), 3);
        assert!(range.is_empty());
        assert_eq!(range.iter().count(), 0);
    }

    #[test]
    fn test_tiles_for_bbox_negative_origin() {
        let scheme = TileScheme::new(-1000.0, -1000.0, 10, 10.0, 0, 5).unwrap();
        let tiles: Vec<_> = tiles_for_bbox(&scheme, &TileBounds::new(-950.0, -950.0, -850.0, -950.0), 0)
            .collect();
        assert_eq!(tiles, vec![TileCoord::new(0, 0, 0), TileCoord::new(1, 0, 0)]);
    }

    #[test]
    fn test_tile_to_world_inverts_local_coords() {
        let scheme = TileScheme::new(-9_000_000.0, -6_000_000.0, 256, 250_000.0, 0, 15).unwrap();
        let coord = TileCoord::new(3, 5, 4);
        let world = scheme.tile_to_world(coord, 0, 0);
        let bounds = scheme.tile_bounds(coord);
        assert_eq!(world.x, bounds.x_min);
        assert_eq!(world.y, bounds.y_min);

        let world = scheme.tile_to_world(coord, 10, 20);
        let r = scheme.resolution(4);
        assert_eq!(world.x, bounds.x_min + 10.0 * r);
        assert_eq!(world.y, bounds.y_min + 20.0 * r);
    }

    #[test]
    fn test_invalid_schemes_rejected() {
        assert!(TileScheme::new(0.0, 0.0, 0, 10.0, 0, 1).is_err());
        assert!(TileScheme::new(0.0, 0.0, 256, 0.0, 0, 1).is_err());
        assert!(TileScheme::new(0.0, 0.0, 256, f64::NAN, 0, 1).is_err());
        assert!(TileScheme::new(f64::INFINITY, 0.0, 256, 1.0, 0, 1).is_err());
        assert!(TileScheme::new(0.0, 0.0, 256, 1.0, 5, 1).is_err());
        assert!(TileScheme::new(0.0, 0.0, 256, 1.0, 0, 31).is_err());
    }

    #[test]
    fn test_bbox_expand() {
        let mut bbox1 = TileBounds::new(-10.0, -10.0, 10.0, 10.0);
        let bbox2 = TileBounds::new(-20.0, -5.0, 5.0, 15.0);

        bbox1.expand(&bbox2);

        assert_eq!(bbox1, TileBounds::new(-20.0, -10.0, 10.0, 15.0));
    }

    #[test]
    fn test_bbox_empty() {
        let bbox = TileBounds::empty();
        assert!(!bbox.is_valid());

        let mut bbox = TileBounds::empty();
        bbox.expand(&TileBounds::new(-10.0, -10.0, 10.0, 10.0));
        assert!(bbox.is_valid());
        assert_eq!(bbox.x_min, -10.0);
    }

    #[test]
    fn test_bbox_intersects_touching() {
        let a = TileBounds::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&TileBounds::new(10.0, 0.0, 20.0, 10.0)));
        assert!(!a.intersects(&TileBounds::new(10.5, 0.0, 20.0, 10.0)));
    }
}
