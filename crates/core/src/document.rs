//! Tile documents: the FeatureCollection written for each non-empty tile.
//!
//! Shape of a document:
//!
//! ```json
//! {
//!   "type": "FeatureCollection",
//!   "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
//!   "features": [
//!     {"type": "Feature", "id": "0", "properties": {...},
//!      "geometry": {"type": "LineString", "coordinates": [[0, 0], [9, 9]]}}
//!   ]
//! }
//! ```
//!
//! Coordinates are tile-local integers. Features are ordered by source id so that
//! the same input always serializes to the same bytes.

use geo::{Coord, Geometry, LineString, Polygon};
use serde::{Deserialize, Serialize};

use crate::feature::{geometry_kind, Attributes};
use crate::{Error, Result};

/// Integer position `[x, y]`
pub type Position = [i64; 2];

/// GeoJSON-shaped geometry with integer coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum TileGeometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

fn position(c: &Coord<f64>) -> Position {
    [c.x as i64, c.y as i64]
}

fn path(ls: &LineString<f64>) -> Vec<Position> {
    ls.0.iter().map(position).collect()
}

fn rings(poly: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(poly.exterior())
        .chain(poly.interiors())
        .map(path)
        .collect()
}

impl TileGeometry {
    /// Convert a geometry whose coordinates are already integral.
    ///
    /// Collections have no GeoJSON-with-integers counterpart here and are rejected.
    pub fn from_geometry(geom: &Geometry<f64>) -> Result<Self> {
        let converted = match geom {
            Geometry::Point(p) => TileGeometry::Point(position(&p.0)),
            Geometry::MultiPoint(mp) => TileGeometry::MultiPoint(mp.0.iter().map(|p| position(&p.0)).collect()),
            Geometry::Line(line) => TileGeometry::LineString(vec![position(&line.start), position(&line.end)]),
            Geometry::LineString(ls) => TileGeometry::LineString(path(ls)),
            Geometry::MultiLineString(mls) => TileGeometry::MultiLineString(mls.0.iter().map(path).collect()),
            Geometry::Polygon(poly) => TileGeometry::Polygon(rings(poly)),
            Geometry::MultiPolygon(mp) => TileGeometry::MultiPolygon(mp.0.iter().map(rings).collect()),
            Geometry::Rect(rect) => TileGeometry::Polygon(rings(&rect.to_polygon())),
            Geometry::Triangle(tri) => TileGeometry::Polygon(rings(&tri.to_polygon())),
            Geometry::GeometryCollection(_) => {
                return Err(Error::GeometryKind {
                    operation: "encode",
                    kind: geometry_kind(geom),
                })
            }
        };
        Ok(converted)
    }
}

/// `"type": "Feature"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureTag {
    #[default]
    Feature,
}

/// `"type": "FeatureCollection"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionTag {
    #[default]
    FeatureCollection,
}

/// One feature of a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFeature {
    #[serde(rename = "type")]
    pub tag: FeatureTag,
    /// Stable id of the source feature, stringified
    pub id: String,
    pub properties: Attributes,
    pub geometry: TileGeometry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrsName {
    pub name: String,
}

/// Named CRS declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCrs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CrsName,
}

impl NamedCrs {
    pub fn epsg(code: u32) -> Self {
        Self {
            kind: "name".to_string(),
            properties: CrsName {
                name: format!("urn:ogc:def:crs:EPSG::{}", code),
            },
        }
    }

    /// EPSG code named by this declaration, if it is one
    pub fn code(&self) -> Option<u32> {
        self.properties.name.rsplit(':').next()?.parse().ok()
    }
}

/// The document written for one tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDocument {
    #[serde(rename = "type")]
    pub tag: CollectionTag,
    pub crs: NamedCrs,
    pub features: Vec<TileFeature>,
}

impl TileDocument {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Compact JSON encoding
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Builder collecting the features of one tile.
pub struct TileDocumentBuilder {
    epsg: u32,
    features: Vec<(u64, TileFeature)>,
}

impl TileDocumentBuilder {
    /// Create a builder for a tile in the given CRS.
    pub fn new(epsg: u32) -> Self {
        Self {
            epsg,
            features: Vec::new(),
        }
    }

    /// Add a feature.
    ///
    /// # Arguments
    /// * `id` - Stable id of the source feature
    /// * `geometry` - Tile-local geometry with integral coordinates
    /// * `attributes` - Source attributes, copied verbatim
    pub fn add_feature(&mut self, id: u64, geometry: &Geometry<f64>, attributes: &Attributes) -> Result<()> {
        let feature = TileFeature {
            tag: FeatureTag::Feature,
            id: id.to_string(),
            properties: attributes.clone(),
            geometry: TileGeometry::from_geometry(geometry)?,
        };
        self.features.push((id, feature));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Build the document, features sorted by source id.
    pub fn build(mut self) -> TileDocument {
        self.features.sort_by_key(|(id, _)| *id);
        TileDocument {
            tag: CollectionTag::FeatureCollection,
            crs: NamedCrs::epsg(self.epsg),
            features: self.features.into_iter().map(|(_, f)| f).collect(),
        }
    }
}
