//! Bounding-box spatial index over a feature set.
//!
//! The index stores one axis-aligned envelope per feature in an R-tree
//! (bulk-loaded, O(n log n)) and answers "which features have an envelope
//! intersecting this rectangle". Results are a conservative superset: a feature
//! whose envelope touches a tile may still have no geometry inside it, so callers
//! must clip against the exact geometry before trusting a candidate.
//!
//! One index is built per feature set and queried once per tile. There is no
//! incremental update.
//!
//! # Example
//!
//! ```
//! use geo::{line_string, Geometry};
//! use trace_tiles_core::spatial_index::SpatialIndex;
//! use trace_tiles_core::{Attributes, FeatureSet, TileBounds};
//!
//! let mut features = FeatureSet::new(3857);
//! features.push_geometry(
//!     Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 300.0, y: 300.0)]),
//!     Attributes::new(),
//! );
//!
//! let index = SpatialIndex::build(features.features());
//! assert_eq!(index.query(&TileBounds::new(100.0, 0.0, 200.0, 100.0)), vec![0]);
//! ```

use rstar::{RTree, RTreeObject, AABB};

use crate::feature::Feature;
use crate::tile::TileBounds;

/// Envelope of one indexed feature
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedBounds {
    /// Position of the feature in the slice the index was built from
    pub position: usize,
    min: [f64; 2],
    max: [f64; 2],
}

impl IndexedBounds {
    pub fn new(position: usize, bounds: &TileBounds) -> Self {
        Self {
            position,
            min: [bounds.x_min, bounds.y_min],
            max: [bounds.x_max, bounds.y_max],
        }
    }
}

impl RTreeObject for IndexedBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Read-only R-tree of feature envelopes
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedBounds>,
}

impl SpatialIndex {
    /// Build the index from a slice of features.
    ///
    /// Features without coordinates (empty geometries) are not indexed.
    pub fn build(features: &[Feature]) -> Self {
        let entries: Vec<IndexedBounds> = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                TileBounds::of_geometry(&feature.geometry)
                    .map(|bounds| IndexedBounds::new(position, &bounds))
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Positions of features whose envelope intersects `bbox` (edges included),
    /// in ascending order.
    pub fn query(&self, bbox: &TileBounds) -> Vec<usize> {
        let envelope = AABB::from_corners([bbox.x_min, bbox.y_min], [bbox.x_max, bbox.y_max]);
        let mut positions: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.position)
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Number of indexed features
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Attributes, FeatureSet};
    use geo::{line_string, point, Geometry, LineString, MultiLineString};

    fn feature_set(geoms: Vec<Geometry<f64>>) -> FeatureSet {
        let mut fs = FeatureSet::new(3857);
        for g in geoms {
            fs.push_geometry(g, Attributes::new());
        }
        fs
    }

    #[test]
    fn test_query_finds_intersecting_envelopes() {
        let fs = feature_set(vec![
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 50.0, y: 50.0)]),
            Geometry::LineString(line_string![(x: 500.0, y: 500.0), (x: 550.0, y: 560.0)]),
            Geometry::Point(point!(x: 20.0, y: 80.0)),
        ]);
        let index = SpatialIndex::build(fs.features());
        assert_eq!(index.len(), 3);

        assert_eq!(index.query(&TileBounds::new(0.0, 0.0, 100.0, 100.0)), vec![0, 2]);
        assert_eq!(index.query(&TileBounds::new(400.0, 400.0, 600.0, 600.0)), vec![1]);
        assert!(index.query(&TileBounds::new(200.0, 200.0, 300.0, 300.0)).is_empty());
    }

    #[test]
    fn test_query_is_conservative_superset() {
        // Diagonal line: its envelope covers the off-diagonal corner tile even though
        // the geometry never enters it.
        let fs = feature_set(vec![Geometry::LineString(
            line_string![(x: 0.0, y: 0.0), (x: 200.0, y: 200.0)],
        )]);
        let index = SpatialIndex::build(fs.features());
        assert_eq!(index.query(&TileBounds::new(150.0, 0.0, 200.0, 50.0)), vec![0]);
    }

    #[test]
    fn test_query_includes_touching_edges() {
        let fs = feature_set(vec![Geometry::Point(point!(x: 100.0, y: 100.0))]);
        let index = SpatialIndex::build(fs.features());
        assert_eq!(index.query(&TileBounds::new(0.0, 0.0, 100.0, 100.0)), vec![0]);
        assert_eq!(index.query(&TileBounds::new(100.0, 100.0, 200.0, 200.0)), vec![0]);
    }

    #[test]
    fn test_empty_geometries_not_indexed() {
        let fs = feature_set(vec![
            Geometry::MultiLineString(MultiLineString::new(vec![])),
            Geometry::LineString(LineString::new(vec![])),
            Geometry::Point(point!(x: 1.0, y: 1.0)),
        ]);
        let index = SpatialIndex::build(fs.features());
        assert_eq!(index.len(), 1);
        assert_eq!(index.query(&TileBounds::new(0.0, 0.0, 10.0, 10.0)), vec![2]);
    }

    #[test]
    fn test_many_features_grid() {
        let geoms: Vec<_> = (0..100)
            .map(|i| {
                let x = (i % 10) as f64 * 100.0 + 10.0;
                let y = (i / 10) as f64 * 100.0 + 10.0;
                Geometry::LineString(line_string![(x: x, y: y), (x: x + 50.0, y: y + 50.0)])
            })
            .collect();
        let index = SpatialIndex::build(feature_set(geoms).features());
        assert!(!index.is_empty());
        assert_eq!(index.query(&TileBounds::new(300.0, 300.0, 399.0, 399.0)), vec![33]);
        assert_eq!(index.query(&TileBounds::new(0.0, 0.0, 1000.0, 1000.0)).len(), 100);
    }
}
