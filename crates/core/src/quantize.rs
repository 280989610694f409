//! Coordinate quantization.
//!
//! Maps every coordinate of a geometry onto an integer grid anchored at an origin:
//!
//! ```text
//! (x, y) -> (floor((x - origin.x) / resolution), floor((y - origin.y) / resolution))
//! ```
//!
//! Floor (toward negative infinity) rather than round or truncate: a coordinate on
//! a grid line always lands in the cell that starts there, and negative offsets do
//! not collapse onto cell 0.
//!
//! The mapping keeps structure. Ring counts, winding order and part counts are
//! unchanged, and degenerate results are left for callers to filter.
//! `GeometryCollection` is rejected; callers decompose collections first.

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

use crate::feature::geometry_kind;
use crate::{Error, Result};

/// Quantize a geometry to grid indices relative to `origin`.
///
/// Output coordinates are integral `f64` values in grid units.
pub fn quantize(geom: &Geometry<f64>, origin: Coord<f64>, resolution: f64) -> Result<Geometry<f64>> {
    map_coordinates(geom, "quantize", |c| Coord {
        x: ((c.x - origin.x) / resolution).floor(),
        y: ((c.y - origin.y) / resolution).floor(),
    })
}

/// Snap a geometry onto the `resolution` grid anchored at `origin`, staying in CRS units.
///
/// Equivalent to [`quantize`] followed by scaling the grid indices back:
/// `origin + floor((x - origin) / resolution) * resolution`.
pub fn snap_to_grid(
    geom: &Geometry<f64>,
    origin: Coord<f64>,
    resolution: f64,
) -> Result<Geometry<f64>> {
    map_coordinates(geom, "snap", |c| Coord {
        x: origin.x + ((c.x - origin.x) / resolution).floor() * resolution,
        y: origin.y + ((c.y - origin.y) / resolution).floor() * resolution,
    })
}

/// Clamp tile-local grid indices into `[0, tile_size - 1]` on both axes.
///
/// A clipped coordinate is strictly inside its tile, but `(x - x_min) / resolution`
/// can still round up to `tile_size` when the tile edge is not exactly
/// representable relative to the origin.
pub fn clamp_to_tile(geom: &Geometry<f64>, tile_size: u32) -> Result<Geometry<f64>> {
    let last = f64::from(tile_size.saturating_sub(1));
    map_coordinates(geom, "clamp", |c| Coord {
        x: c.x.clamp(0.0, last),
        y: c.y.clamp(0.0, last),
    })
}

/// Round every coordinate to the nearest integer, halves away from zero.
pub fn round_coordinates(geom: &Geometry<f64>) -> Result<Geometry<f64>> {
    map_coordinates(geom, "round", |c| Coord {
        x: c.x.round(),
        y: c.y.round(),
    })
}

/// Apply `f` to every coordinate, preserving structure.
///
/// `Line`, `Rect` and `Triangle` come back as `LineString` / `Polygon` so
/// downstream stages only see the GeoJSON kinds.
pub fn map_coordinates<F>(geom: &Geometry<f64>, operation: &'static str, f: F) -> Result<Geometry<f64>>
where
    F: Fn(Coord<f64>) -> Coord<f64>,
{
    let mapped = match geom {
        Geometry::Point(p) => Geometry::Point(Point(f(p.0))),
        Geometry::Line(line) => Geometry::LineString(LineString::new(vec![f(line.start), f(line.end)])),
        Geometry::LineString(ls) => Geometry::LineString(map_line_string(ls, &f)),
        Geometry::Polygon(poly) => Geometry::Polygon(map_polygon(poly, &f)),
        Geometry::MultiPoint(mp) => {
            Geometry::MultiPoint(MultiPoint::new(mp.0.iter().map(|p| Point(f(p.0))).collect()))
        }
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.0.iter().map(|ls| map_line_string(ls, &f)).collect(),
        )),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon::new(
            mp.0.iter().map(|poly| map_polygon(poly, &f)).collect(),
        )),
        Geometry::Rect(rect) => Geometry::Polygon(map_polygon(&rect.to_polygon(), &f)),
        Geometry::Triangle(tri) => Geometry::Polygon(map_polygon(&tri.to_polygon(), &f)),
        Geometry::GeometryCollection(_) => {
            return Err(Error::GeometryKind {
                operation,
                kind: geometry_kind(geom),
            })
        }
    };
    Ok(mapped)
}

fn map_line_string<F>(ls: &LineString<f64>, f: &F) -> LineString<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64>,
{
    LineString::new(ls.0.iter().map(|c| f(*c)).collect())
}

fn map_polygon<F>(poly: &Polygon<f64>, f: &F) -> Polygon<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64>,
{
    Polygon::new(
        map_line_string(poly.exterior(), f),
        poly.interiors().iter().map(|ring| map_line_string(ring, f)).collect(),
    )
}
