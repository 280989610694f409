//! Douglas-Peucker simplification.
//!
//! Uses the Ramer-Douglas-Peucker (RDP) algorithm via `geo::Simplify`, applied per
//! part for multi-geometries and per ring for polygons.
//!
//! Two callers with different tolerances:
//!
//! - The Generalizer simplifies in CRS units with the zoom resolution as epsilon.
//! - The TileEngine does not run Douglas-Peucker at all. Its cleanup of quantized
//!   tile-local coordinates ([`simplify_tile_geometry`]) is lossless: repeated
//!   points and vertices on straight runs go, every turn stays.
//!
//! Points pass through unchanged. `GeometryCollection` has no per-kind handling and
//! is rejected with [`Error::GeometryKind`](crate::Error::GeometryKind).

use geo::kernels::RobustKernel;
use geo::{
    Coord, Geometry, Kernel, LineString, MultiLineString, MultiPolygon, Orientation, Polygon,
    RemoveRepeatedPoints, Simplify,
};

use crate::feature::geometry_kind;
use crate::{Error, Result};

/// Simplify a geometry with Douglas-Peucker.
///
/// # Arguments
/// * `geom` - The geometry to simplify
/// * `tolerance` - Maximum perpendicular distance of a removed vertex, in the
///   geometry's own units
///
/// # Returns
/// The simplified geometry. Degenerate parts (a linestring with fewer than two
/// vertices) are returned unchanged for [`validate`](crate::validate) to filter.
pub fn simplify_geometry(geom: &Geometry<f64>, tolerance: f64) -> Result<Geometry<f64>> {
    let simplified = match geom {
        // Points have no vertices to simplify
        Geometry::Point(_) | Geometry::MultiPoint(_) => geom.clone(),

        Geometry::Line(line) => Geometry::LineString(simplify_linestring(
            &LineString::new(vec![line.start, line.end]),
            tolerance,
        )),
        Geometry::LineString(ls) => Geometry::LineString(simplify_linestring(ls, tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.0.iter().map(|ls| simplify_linestring(ls, tolerance)).collect(),
        )),

        Geometry::Polygon(poly) => Geometry::Polygon(poly.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon().simplify(&tolerance)),
        Geometry::Triangle(tri) => Geometry::Polygon(tri.to_polygon().simplify(&tolerance)),

        Geometry::GeometryCollection(_) => {
            return Err(Error::GeometryKind {
                operation: "simplify",
                kind: geometry_kind(geom),
            })
        }
    };
    Ok(simplified)
}

/// geo's RDP expects at least two vertices
fn simplify_linestring(ls: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    if ls.0.len() < 2 {
        return ls.clone();
    }
    ls.simplify(&tolerance)
}

/// Drop repeated vertices with `geo::RemoveRepeatedPoints`.
///
/// Linestrings and rings lose vertices equal to their predecessor; a `MultiPoint`
/// loses every repeated point. `Line`, `Rect` and `Triangle` come back as
/// `LineString` / `Polygon`.
pub fn remove_repeated_points(geom: &Geometry<f64>) -> Result<Geometry<f64>> {
    let deduped = match geom {
        Geometry::Line(line) => {
            Geometry::LineString(LineString::new(vec![line.start, line.end]).remove_repeated_points())
        }
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon().remove_repeated_points()),
        Geometry::Triangle(tri) => Geometry::Polygon(tri.to_polygon().remove_repeated_points()),
        Geometry::GeometryCollection(_) => {
            return Err(Error::GeometryKind {
                operation: "simplify",
                kind: geometry_kind(geom),
            })
        }
        Geometry::Point(_)
        | Geometry::MultiPoint(_)
        | Geometry::LineString(_)
        | Geometry::MultiLineString(_)
        | Geometry::Polygon(_)
        | Geometry::MultiPolygon(_) => geom.remove_repeated_points(),
    };
    Ok(deduped)
}

/// Drop interior vertices that sit on a straight run between their neighbours.
///
/// A vertex is removed only when the path passes straight through it; a vertex
/// where the path doubles back on itself is kept. Rings are treated cyclically,
/// so the closing vertex can go too. Expects repeated points already removed.
pub fn remove_collinear_vertices(geom: &Geometry<f64>) -> Result<Geometry<f64>> {
    let reduced = match geom {
        Geometry::Point(_) | Geometry::MultiPoint(_) => geom.clone(),
        Geometry::Line(line) => Geometry::LineString(LineString::new(vec![line.start, line.end])),
        Geometry::LineString(ls) => Geometry::LineString(reduce_path(ls)),
        Geometry::MultiLineString(mls) => {
            Geometry::MultiLineString(MultiLineString::new(mls.0.iter().map(reduce_path).collect()))
        }
        Geometry::Polygon(poly) => Geometry::Polygon(reduce_polygon(poly)),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(MultiPolygon::new(mp.0.iter().map(reduce_polygon).collect()))
        }
        Geometry::Rect(rect) => Geometry::Polygon(reduce_polygon(&rect.to_polygon())),
        Geometry::Triangle(tri) => Geometry::Polygon(reduce_polygon(&tri.to_polygon())),
        Geometry::GeometryCollection(_) => {
            return Err(Error::GeometryKind {
                operation: "simplify",
                kind: geometry_kind(geom),
            })
        }
    };
    Ok(reduced)
}

/// `b` lies on segment `a`-`c` and the path keeps its direction through it
fn passes_straight(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> bool {
    RobustKernel::orient2d(a, b, c) == Orientation::Collinear
        && (b.x - a.x) * (c.x - b.x) + (b.y - a.y) * (c.y - b.y) > 0.0
}

fn drop_straight(coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for &c in coords {
        while out.len() >= 2 && passes_straight(out[out.len() - 2], out[out.len() - 1], c) {
            out.pop();
        }
        out.push(c);
    }
    out
}

fn reduce_path(ls: &LineString<f64>) -> LineString<f64> {
    LineString::new(drop_straight(&ls.0))
}

fn reduce_ring(ring: &LineString<f64>) -> LineString<f64> {
    if ring.0.len() < 4 || !ring.is_closed() {
        return ring.clone();
    }
    let mut open = drop_straight(&ring.0[..ring.0.len() - 1]);

    // Vertices next to the closing point
    while open.len() >= 3 {
        let n = open.len();
        if passes_straight(open[n - 1], open[0], open[1]) {
            open.remove(0);
        } else if passes_straight(open[n - 2], open[n - 1], open[0]) {
            open.pop();
        } else {
            break;
        }
    }

    if let Some(&first) = open.first() {
        open.push(first);
    }
    LineString::new(open)
}

fn reduce_polygon(poly: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(
        reduce_ring(poly.exterior()),
        poly.interiors().iter().map(reduce_ring).collect(),
    )
}

/// Lossless cleanup of quantized tile geometry: repeated points first, then
/// vertices on straight runs.
pub fn simplify_tile_geometry(geom: &Geometry<f64>) -> Result<Geometry<f64>> {
    let deduped = remove_repeated_points(geom)?;
    remove_collinear_vertices(&deduped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, Area, GeometryCollection};

    #[test]
    fn test_simplify_point_unchanged() {
        let p = Geometry::Point(point!(x: 1.5, y: 2.5));
        assert_eq!(simplify_geometry(&p, 100.0).unwrap(), p);
    }

    #[test]
    fn test_simplify_removes_small_deviation() {
        let ls = Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 50.0, y: 2.0),
            (x: 100.0, y: 0.0),
        ]);
        let simplified = simplify_geometry(&ls, 10.0).unwrap();
        assert_eq!(
            simplified,
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)])
        );
    }

    #[test]
    fn test_simplify_keeps_large_deviation() {
        let ls = Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 50.0, y: 40.0),
            (x: 100.0, y: 0.0),
        ]);
        let simplified = simplify_geometry(&ls, 10.0).unwrap();
        assert_eq!(simplified, ls);
    }

    #[test]
    fn test_simplify_multilinestring_per_part() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 1.0), (x: 10.0, y: 0.0)],
            line_string![(x: 0.0, y: 10.0)],
        ]));
        match simplify_geometry(&mls, 2.0).unwrap() {
            Geometry::MultiLineString(out) => {
                assert_eq!(out.0[0].0.len(), 2);
                // Degenerate part left for validation
                assert_eq!(out.0[1].0.len(), 1);
            }
            other => panic!("Expected MultiLineString, got {:?}", other),
        }
    }

    #[test]
    fn test_simplify_collection_is_kind_error() {
        let gc = Geometry::GeometryCollection(GeometryCollection(vec![]));
        match simplify_geometry(&gc, 1.0) {
            Err(Error::GeometryKind { operation, .. }) => assert_eq!(operation, "simplify"),
            other => panic!("Expected GeometryKind error, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_repeated_points() {
        let ls = Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        assert_eq!(
            remove_repeated_points(&ls).unwrap(),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)])
        );
    }

    #[test]
    fn test_tile_simplify_removes_collinear_only() {
        let ls = Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 2.0, y: 2.0),
            (x: 3.0, y: 2.0),
        ]);
        assert_eq!(
            simplify_tile_geometry(&ls).unwrap(),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 3.0, y: 2.0)])
        );
    }

    #[test]
    fn test_tile_simplify_polygon_ring() {
        let poly = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 5.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]);
        match simplify_tile_geometry(&poly).unwrap() {
            Geometry::Polygon(p) => assert_eq!(p.exterior().0.len(), 5),
            other => panic!("Expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_tile_simplify_keeps_turnaround_vertex() {
        // Out and back along the same line: the far end is a real vertex
        let ls = Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 8.0, y: 0.0),
            (x: 2.0, y: 0.0),
        ]);
        assert_eq!(
            simplify_tile_geometry(&ls).unwrap(),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 8.0, y: 0.0), (x: 2.0, y: 0.0)])
        );
    }

    #[test]
    fn test_tile_simplify_ring_closing_vertex() {
        // Ring starts halfway along its bottom edge
        let poly = Geometry::Polygon(polygon![
            (x: 5.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ]);
        match simplify_tile_geometry(&poly).unwrap() {
            Geometry::Polygon(p) => {
                assert_eq!(p.exterior().0.len(), 5);
                assert!(!p.exterior().0.contains(&Coord { x: 5.0, y: 0.0 }));
                assert_eq!(p.unsigned_area(), 100.0);
            }
            other => panic!("Expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_repeated_points_in_multipoint() {
        let mp = Geometry::MultiPoint(geo::MultiPoint::new(vec![
            point!(x: 1.0, y: 1.0),
            point!(x: 2.0, y: 2.0),
            point!(x: 1.0, y: 1.0),
        ]));
        match remove_repeated_points(&mp).unwrap() {
            Geometry::MultiPoint(out) => assert_eq!(out.0.len(), 2),
            other => panic!("Expected MultiPoint, got {:?}", other),
        }
    }
}
