//! Degenerate geometry detection.
//!
//! Snapping to a grid and quantizing to tile-local integers collapse small shapes.
//! After those stages a geometry can be:
//! - a LineString whose vertices all fall on one grid point
//! - a Polygon ring with fewer than 4 points, or with zero area
//! - a multi-geometry with no surviving parts
//! - empty
//!
//! Degenerate geometries are dropped, not repaired. Multi-geometries keep their
//! valid parts and downgrade to the single kind when only one part survives.
//!
//! # Usage
//!
//! ```
//! use trace_tiles_core::validate::is_valid_geometry;
//! use geo::{Geometry, LineString, Coord};
//!
//! let line = LineString::new(vec![
//!     Coord { x: 0.0, y: 0.0 },
//!     Coord { x: 1.0, y: 1.0 },
//! ]);
//! assert!(is_valid_geometry(&Geometry::LineString(line)));
//!
//! let collapsed = LineString::new(vec![
//!     Coord { x: 3.0, y: 3.0 },
//!     Coord { x: 3.0, y: 3.0 },
//! ]);
//! assert!(!is_valid_geometry(&Geometry::LineString(collapsed)));
//! ```

use geo::{Area, Geometry, LineString, MultiLineString, MultiPolygon, Polygon};

/// Minimum number of points for a valid polygon ring (3 unique + closing = 4)
pub const MIN_POLYGON_RING_POINTS: usize = 4;

/// Minimum number of distinct points for a valid linestring
pub const MIN_LINESTRING_POINTS: usize = 2;

/// Result of geometry validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(InvalidReason),
}

/// Reason why a geometry is invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Polygon ring has fewer than 4 points
    PolygonTooFewPoints {
        ring_index: usize,
        point_count: usize,
    },
    /// LineString has fewer than 2 distinct points
    LineStringTooFewPoints { distinct_points: usize },
    /// Polygon exterior encloses no area
    ZeroAreaPolygon,
    /// Geometry has no coordinates
    EmptyGeometry,
    /// MultiPolygon has no valid polygons after filtering
    NoValidPolygons,
    /// MultiLineString has no valid linestrings after filtering
    NoValidLineStrings,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid(_))
    }
}

/// Check if a geometry survives degenerate filtering.
pub fn is_valid_geometry(geom: &Geometry<f64>) -> bool {
    validate_geometry(geom).is_valid()
}

/// True if the geometry has no coordinates at all.
///
/// A `Point` is never empty. Multi-geometries are empty when they have no parts
/// or every part is empty.
pub fn is_empty_geometry(geom: &Geometry<f64>) -> bool {
    match geom {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::LineString(ls) => ls.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.0.iter().all(|ls| ls.0.is_empty()),
        Geometry::Polygon(poly) => poly.exterior().0.is_empty(),
        Geometry::MultiPolygon(mp) => mp.0.iter().all(|p| p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.0.iter().all(is_empty_geometry),
    }
}

/// Validate a geometry and return the detailed result.
pub fn validate_geometry(geom: &Geometry<f64>) -> ValidationResult {
    match geom {
        Geometry::Point(_) => ValidationResult::Valid,
        Geometry::MultiPoint(mp) => {
            if mp.0.is_empty() {
                ValidationResult::Invalid(InvalidReason::EmptyGeometry)
            } else {
                ValidationResult::Valid
            }
        }
        Geometry::Line(line) => {
            if line.start == line.end {
                ValidationResult::Invalid(InvalidReason::LineStringTooFewPoints { distinct_points: 1 })
            } else {
                ValidationResult::Valid
            }
        }
        Geometry::LineString(ls) => validate_linestring(ls),
        Geometry::MultiLineString(mls) => validate_multi_linestring(mls),
        Geometry::Polygon(poly) => validate_polygon(poly),
        Geometry::MultiPolygon(mp) => validate_multi_polygon(mp),
        Geometry::Rect(_) | Geometry::Triangle(_) => ValidationResult::Valid,
        Geometry::GeometryCollection(_) => {
            if is_empty_geometry(geom) {
                ValidationResult::Invalid(InvalidReason::EmptyGeometry)
            } else {
                ValidationResult::Valid
            }
        }
    }
}

/// A linestring needs two distinct vertices; repeated vertices do not count.
pub fn validate_linestring(ls: &LineString<f64>) -> ValidationResult {
    let Some(first) = ls.0.first() else {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    };
    let distinct_points = if ls.0.iter().any(|c| c != first) { 2 } else { 1 };
    if distinct_points < MIN_LINESTRING_POINTS {
        ValidationResult::Invalid(InvalidReason::LineStringTooFewPoints { distinct_points })
    } else {
        ValidationResult::Valid
    }
}

pub fn validate_multi_linestring(mls: &MultiLineString<f64>) -> ValidationResult {
    if mls.0.is_empty() {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }

    if mls.0.iter().any(|ls| validate_linestring(ls).is_valid()) {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(InvalidReason::NoValidLineStrings)
    }
}

/// Validate the exterior ring of a polygon.
///
/// Holes are not checked here; [`filter_valid_geometry`] drops collapsed holes
/// instead of the whole polygon.
pub fn validate_polygon(poly: &Polygon<f64>) -> ValidationResult {
    let exterior_count = poly.exterior().0.len();
    if exterior_count == 0 {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }
    if exterior_count < MIN_POLYGON_RING_POINTS {
        return ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
            ring_index: 0,
            point_count: exterior_count,
        });
    }

    if Polygon::new(poly.exterior().clone(), vec![]).unsigned_area() == 0.0 {
        return ValidationResult::Invalid(InvalidReason::ZeroAreaPolygon);
    }

    ValidationResult::Valid
}

pub fn validate_multi_polygon(mp: &MultiPolygon<f64>) -> ValidationResult {
    if mp.0.is_empty() {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }

    if mp.0.iter().any(|poly| validate_polygon(poly).is_valid()) {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(InvalidReason::NoValidPolygons)
    }
}

/// Filter a geometry, returning `Some(geometry)` if anything valid remains.
///
/// Multi-geometries keep only their valid parts. Polygons keep only holes with
/// enough points and nonzero area.
pub fn filter_valid_geometry(geom: &Geometry<f64>) -> Option<Geometry<f64>> {
    match geom {
        Geometry::LineString(ls) => validate_linestring(ls).is_valid().then(|| geom.clone()),
        Geometry::MultiLineString(mls) => filter_multi_linestring(mls),
        Geometry::Polygon(poly) => filter_polygon(poly).map(Geometry::Polygon),
        Geometry::MultiPolygon(mp) => filter_multi_polygon(mp),
        other => is_valid_geometry(other).then(|| other.clone()),
    }
}

/// Filter a MultiLineString, keeping only valid linestrings.
fn filter_multi_linestring(mls: &MultiLineString<f64>) -> Option<Geometry<f64>> {
    let mut valid_lines: Vec<LineString<f64>> = mls
        .0
        .iter()
        .filter(|ls| validate_linestring(ls).is_valid())
        .cloned()
        .collect();

    match valid_lines.len() {
        0 => None,
        // Downgrade to single LineString if only one remains
        1 => valid_lines.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(valid_lines))),
    }
}

fn filter_polygon(poly: &Polygon<f64>) -> Option<Polygon<f64>> {
    if validate_polygon(poly).is_invalid() {
        return None;
    }
    let holes: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .filter(|ring| {
            ring.0.len() >= MIN_POLYGON_RING_POINTS
                && Polygon::new((*ring).clone(), vec![]).unsigned_area() > 0.0
        })
        .cloned()
        .collect();
    Some(Polygon::new(poly.exterior().clone(), holes))
}

/// Filter a MultiPolygon, keeping only valid polygons.
fn filter_multi_polygon(mp: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let mut valid_polygons: Vec<Polygon<f64>> = mp.0.iter().filter_map(filter_polygon).collect();

    match valid_polygons.len() {
        0 => None,
        // Downgrade to single Polygon if only one remains
        1 => valid_polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(valid_polygons))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, GeometryCollection, MultiPoint, Point};

    // =========================================================================
    // HELPER FUNCTIONS
    // =========================================================================

    fn make_linestring(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::new(coords.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    fn make_polygon(exterior: &[(f64, f64)]) -> Polygon<f64> {
        Polygon::new(make_linestring(exterior), vec![])
    }

    // =========================================================================
    // POINT TESTS
    // =========================================================================

    #[test]
    fn test_point_always_valid() {
        let point = Geometry::Point(Point::new(3.0, 4.0));
        assert!(is_valid_geometry(&point));
        assert!(!is_empty_geometry(&point));
    }

    #[test]
    fn test_multipoint_empty_invalid() {
        let mp = Geometry::MultiPoint(MultiPoint::new(vec![]));
        assert!(is_empty_geometry(&mp));
        assert_eq!(
            validate_geometry(&mp),
            ValidationResult::Invalid(InvalidReason::EmptyGeometry)
        );
    }

    // =========================================================================
    // LINESTRING TESTS
    // =========================================================================

    #[test]
    fn test_linestring_valid_two_points() {
        let ls = Geometry::LineString(make_linestring(&[(0.0, 0.0), (1.0, 0.0)]));
        assert!(is_valid_geometry(&ls));
    }

    #[test]
    fn test_linestring_collapsed_to_one_point_invalid() {
        let ls = Geometry::LineString(make_linestring(&[(2.0, 2.0), (2.0, 2.0), (2.0, 2.0)]));
        assert_eq!(
            validate_geometry(&ls),
            ValidationResult::Invalid(InvalidReason::LineStringTooFewPoints { distinct_points: 1 })
        );
    }

    #[test]
    fn test_linestring_empty() {
        let ls = Geometry::LineString(LineString::new(vec![]));
        assert!(is_empty_geometry(&ls));
        assert_eq!(
            validate_geometry(&ls),
            ValidationResult::Invalid(InvalidReason::EmptyGeometry)
        );
    }

    #[test]
    fn test_multilinestring_all_invalid_lines() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            make_linestring(&[(0.0, 0.0)]),
            make_linestring(&[(1.0, 1.0), (1.0, 1.0)]),
        ]));
        assert_eq!(
            validate_geometry(&mls),
            ValidationResult::Invalid(InvalidReason::NoValidLineStrings)
        );
        assert!(filter_valid_geometry(&mls).is_none());
    }

    #[test]
    fn test_filter_multilinestring_downgrades_to_single() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            make_linestring(&[(0.0, 0.0), (0.0, 0.0)]),
            make_linestring(&[(1.0, 1.0), (2.0, 2.0)]),
        ]));
        assert_eq!(
            filter_valid_geometry(&mls),
            Some(Geometry::LineString(make_linestring(&[(1.0, 1.0), (2.0, 2.0)])))
        );
    }

    #[test]
    fn test_filter_multilinestring_keeps_valid_parts() {
        let mls = Geometry::MultiLineString(MultiLineString::new(vec![
            make_linestring(&[(0.0, 0.0), (1.0, 0.0)]),
            make_linestring(&[(5.0, 5.0)]),
            make_linestring(&[(1.0, 1.0), (2.0, 2.0)]),
        ]));
        match filter_valid_geometry(&mls) {
            Some(Geometry::MultiLineString(out)) => assert_eq!(out.0.len(), 2),
            other => panic!("Expected MultiLineString, got {:?}", other),
        }
    }

    // =========================================================================
    // POLYGON TESTS
    // =========================================================================

    #[test]
    fn test_polygon_valid_triangle() {
        let poly = Geometry::Polygon(make_polygon(&[(0.0, 0.0), (1.0, 0.0), (0.5, 1.0), (0.0, 0.0)]));
        assert!(is_valid_geometry(&poly));
    }

    #[test]
    fn test_polygon_invalid_zero_area_collinear() {
        let poly = Geometry::Polygon(make_polygon(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (0.0, 0.0)]));
        assert_eq!(
            validate_geometry(&poly),
            ValidationResult::Invalid(InvalidReason::ZeroAreaPolygon)
        );
    }

    #[test]
    fn test_polygon_invalid_too_few_points() {
        let poly = Geometry::Polygon(make_polygon(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]));
        assert_eq!(
            validate_geometry(&poly),
            ValidationResult::Invalid(InvalidReason::PolygonTooFewPoints {
                ring_index: 0,
                point_count: 3
            })
        );
    }

    #[test]
    fn test_filter_polygon_drops_collapsed_hole() {
        let poly = Geometry::Polygon(Polygon::new(
            make_linestring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]),
            vec![
                make_linestring(&[(2.0, 2.0), (2.0, 2.0), (2.0, 2.0), (2.0, 2.0)]),
                make_linestring(&[(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 4.0)]),
            ],
        ));
        match filter_valid_geometry(&poly) {
            Some(Geometry::Polygon(p)) => assert_eq!(p.interiors().len(), 1),
            other => panic!("Expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_multipolygon_downgrades_to_single() {
        let mp = Geometry::MultiPolygon(MultiPolygon::new(vec![
            make_polygon(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]),
            make_polygon(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)]),
        ]));
        assert!(matches!(filter_valid_geometry(&mp), Some(Geometry::Polygon(_))));
    }

    #[test]
    fn test_empty_collection() {
        let gc = Geometry::GeometryCollection(GeometryCollection(vec![]));
        assert!(is_empty_geometry(&gc));
        assert!(!is_valid_geometry(&gc));
    }

    #[test]
    fn test_validation_result_methods() {
        assert!(ValidationResult::Valid.is_valid());
        assert!(!ValidationResult::Valid.is_invalid());
        let invalid = ValidationResult::Invalid(InvalidReason::EmptyGeometry);
        assert!(invalid.is_invalid());
    }
}
