//! Features and feature sets.
//!
//! A [`Feature`] is a planar geometry plus an ordered attribute map and a stable
//! identifier assigned in ingestion order. A [`FeatureSet`] is the unit handed
//! between pipeline stages: the Generalizer produces one per zoom level and the
//! tile engine consumes it read-only.

use std::fmt;

use geo::Geometry;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tile::TileBounds;
use crate::{Error, Result};

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Type of an attribute value, used for schema inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Boolean,
    Integer,
    Float,
    String,
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Integer(_) => AttributeKind::Integer,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::String(_) => AttributeKind::String,
        }
    }

    /// Convert a JSON scalar. Arrays, objects and null are not attribute values.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(AttributeValue::Boolean(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Integer)
                .or_else(|| n.as_f64().map(AttributeValue::Float)),
            serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::Boolean => "bool",
            AttributeKind::Integer => "int",
            AttributeKind::Float => "float",
            AttributeKind::String => "str",
        };
        f.write_str(name)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

/// Attribute map that keeps insertion order.
///
/// Serializes as a JSON object with keys in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing (in place) any previous value for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let idx = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AttributesVisitor;

        impl<'de> Visitor<'de> for AttributesVisitor {
            type Value = Attributes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of scalar attribute values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Attributes, A::Error> {
                let mut attrs = Attributes::new();
                while let Some((k, v)) = access.next_entry::<String, AttributeValue>()? {
                    attrs.insert(k, v);
                }
                Ok(attrs)
            }
        }

        deserializer.deserialize_map(AttributesVisitor)
    }
}

/// A geometry with its attributes and stable identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Stable identifier, assigned in ingestion order
    pub id: u64,
    pub geometry: Geometry<f64>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: u64, geometry: Geometry<f64>, attributes: Attributes) -> Self {
        Self {
            id,
            geometry,
            attributes,
        }
    }

    /// Same id and attributes, new geometry
    pub fn with_geometry(&self, geometry: Geometry<f64>) -> Self {
        Self {
            id: self.id,
            geometry,
            attributes: self.attributes.clone(),
        }
    }
}

/// Collection of features sharing one coordinate reference system
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// EPSG code of the working CRS
    pub epsg: u32,
    features: Vec<Feature>,
    next_id: u64,
}

impl FeatureSet {
    /// Create an empty feature set
    pub fn new(epsg: u32) -> Self {
        Self {
            epsg,
            features: Vec::new(),
            next_id: 0,
        }
    }

    /// Create a feature set from existing features, keeping their ids
    pub fn from_features(epsg: u32, features: Vec<Feature>) -> Self {
        let next_id = features.iter().map(|f| f.id + 1).max().unwrap_or(0);
        Self {
            epsg,
            features,
            next_id,
        }
    }

    /// Add a geometry with the next ingestion id; returns the id
    pub fn push_geometry(&mut self, geometry: Geometry<f64>, attributes: Attributes) -> u64 {
        let id = self.next_id;
        self.push(Feature::new(id, geometry, attributes));
        id
    }

    /// Add a feature, keeping its id
    pub fn push(&mut self, feature: Feature) {
        self.next_id = self.next_id.max(feature.id + 1);
        self.features.push(feature);
    }

    /// Next id [`push_geometry`](Self::push_geometry) would assign
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Append all features of another set with the same CRS
    pub fn extend(&mut self, other: FeatureSet) -> Result<()> {
        if other.epsg != self.epsg {
            return Err(Error::InvalidConfig(format!(
                "cannot union feature sets in EPSG:{} and EPSG:{}",
                self.epsg, other.epsg
            )));
        }
        for feature in other.features {
            self.push(feature);
        }
        Ok(())
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Bounding box of all geometries (invalid when no feature has coordinates)
    pub fn bounds(&self) -> TileBounds {
        let mut bounds = TileBounds::empty();
        for feature in &self.features {
            if let Some(b) = TileBounds::of_geometry(&feature.geometry) {
                bounds.expand(&b);
            }
        }
        bounds
    }

    /// Infer the attribute schema, in first-seen order.
    ///
    /// Fails if an attribute name carries values of different types.
    pub fn schema(&self) -> Result<Vec<(String, AttributeKind)>> {
        let mut schema: Vec<(String, AttributeKind)> = Vec::new();
        for feature in &self.features {
            for (name, value) in feature.attributes.iter() {
                let kind = value.kind();
                match schema.iter().find(|(n, _)| n == name) {
                    Some((_, expected)) if *expected != kind => {
                        return Err(Error::Schema {
                            attribute: name.to_string(),
                            expected: *expected,
                            found: kind,
                            feature: feature.id,
                        });
                    }
                    Some(_) => {}
                    None => schema.push((name.to_string(), kind)),
                }
            }
        }
        Ok(schema)
    }
}

impl IntoIterator for FeatureSet {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

/// Lowercase name of a geometry kind, as used for layer names
pub fn geometry_kind(geom: &Geometry<f64>) -> &'static str {
    match geom {
        Geometry::Point(_) => "point",
        Geometry::Line(_) => "line",
        Geometry::LineString(_) => "linestring",
        Geometry::Polygon(_) => "polygon",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::MultiPolygon(_) => "multipolygon",
        Geometry::GeometryCollection(_) => "geometrycollection",
        Geometry::Rect(_) => "rect",
        Geometry::Triangle(_) => "triangle",
    }
}
