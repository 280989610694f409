//! Feature stores: where FeatureSets are read from and written to.
//!
//! A store path names a dataset made of layers. Tile input usually mixes geometry
//! kinds that were saved as separate layers (`point`, `linestring`, ...), so reads
//! take an optional layer filter and union the layers they load.
//!
//! [`GeoJsonStore`] maps a dataset to a directory with one `<layer>.geojson`
//! FeatureCollection per layer. [`MemoryStore`] keeps everything in a map.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use geojson::feature::Id;
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use log::{debug, warn};

use crate::feature::{geometry_kind, AttributeValue, Attributes, Feature, FeatureSet};
use crate::{Error, Result, DEFAULT_EPSG};

/// File extension of a layer inside a [`GeoJsonStore`] dataset
pub const LAYER_EXTENSION: &str = "geojson";

/// Read and write access to layered feature datasets
pub trait FeatureStore: Send + Sync {
    /// Read a dataset, keeping only the named layers when `layers` is given.
    ///
    /// Layers are unioned in layer-name order. Requested layers that do not exist
    /// are skipped.
    fn read(&self, path: &Path, layers: Option<&[&str]>) -> Result<FeatureSet>;

    /// Write a feature set as one layer, replacing any existing layer of that name
    fn write(&self, features: &FeatureSet, path: &Path, layer_name: &str) -> Result<()>;

    /// Names of the layers in a dataset, sorted
    fn layers(&self, path: &Path) -> Result<Vec<String>>;

    /// Write a feature set split into one layer per geometry kind.
    ///
    /// Returns the layer names written, sorted.
    fn write_by_kind(&self, features: &FeatureSet, path: &Path) -> Result<Vec<String>> {
        let mut by_kind: BTreeMap<&'static str, Vec<Feature>> = BTreeMap::new();
        for feature in features.iter() {
            by_kind
                .entry(geometry_kind(&feature.geometry))
                .or_default()
                .push(feature.clone());
        }

        let mut written = Vec::with_capacity(by_kind.len());
        for (kind, layer) in by_kind {
            self.write(&FeatureSet::from_features(features.epsg, layer), path, kind)?;
            written.push(kind.to_string());
        }
        Ok(written)
    }
}

/// Named-CRS member used by GeoJSON stores and tile documents
pub fn crs_member(epsg: u32) -> JsonValue {
    serde_json::json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
    })
}

/// Parse the EPSG code out of a named-CRS member
pub fn parse_crs_member(crs: &JsonValue) -> Option<u32> {
    let name = crs.get("properties")?.get("name")?.as_str()?;
    name.rsplit(':').next()?.parse().ok()
}

/// Directory-backed store of GeoJSON layers
#[derive(Debug, Default, Clone)]
pub struct GeoJsonStore;

impl GeoJsonStore {
    pub fn new() -> Self {
        Self
    }

    fn layer_path(path: &Path, layer: &str) -> PathBuf {
        path.join(format!("{}.{}", layer, LAYER_EXTENSION))
    }

    fn read_layer(&self, file: &Path, next_id: u64) -> Result<FeatureSet> {
        let text = fs::read_to_string(file).map_err(|e| Error::store_io(file, e))?;
        let geojson: GeoJson = text.parse().map_err(|e| Error::store_io(file, e))?;
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            GeoJson::Feature(_) | GeoJson::Geometry(_) => {
                return Err(Error::store_io(file, "expected a FeatureCollection"));
            }
        };

        let epsg = collection
            .foreign_members
            .as_ref()
            .and_then(|members| members.get("crs"))
            .and_then(parse_crs_member)
            .unwrap_or_else(|| {
                debug!("{} has no CRS member, assuming EPSG:{}", file.display(), DEFAULT_EPSG);
                DEFAULT_EPSG
            });

        let mut features = FeatureSet::new(epsg);
        let mut fallback_id = next_id;
        for (index, record) in collection.features.into_iter().enumerate() {
            match convert_feature(record, fallback_id) {
                Ok(feature) => {
                    fallback_id = fallback_id.max(feature.id + 1);
                    features.push(feature);
                }
                Err(err) => warn!("{}: record {}: {}", file.display(), index, err),
            }
        }
        Ok(features)
    }
}

/// Convert one GeoJSON record into a feature.
///
/// Records without a numeric id get `fallback_id`.
fn convert_feature(record: geojson::Feature, fallback_id: u64) -> Result<Feature> {
    let id = match &record.id {
        Some(Id::Number(n)) => n.as_u64(),
        Some(Id::String(s)) => s.parse().ok(),
        None => None,
    }
    .unwrap_or(fallback_id);

    let ingest_error = |reason: String| Error::FeatureIngest {
        feature: id.to_string(),
        reason,
    };

    let geometry = record
        .geometry
        .ok_or_else(|| ingest_error("null geometry".to_string()))?;
    let geometry = geo::Geometry::<f64>::try_from(geometry).map_err(|e| ingest_error(e.to_string()))?;

    let mut attributes = Attributes::new();
    if let Some(properties) = record.properties {
        for (name, value) in properties {
            if value.is_null() {
                continue;
            }
            let value = AttributeValue::from_json(&value)
                .ok_or_else(|| ingest_error(format!("attribute {} is not a scalar", name)))?;
            attributes.insert(name, value);
        }
    }

    Ok(Feature::new(id, geometry, attributes))
}

fn to_geojson_feature(feature: &Feature) -> Result<geojson::Feature> {
    let properties = match serde_json::to_value(&feature.attributes)? {
        JsonValue::Object(map) => Some(map),
        _ => None,
    };
    Ok(geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&feature.geometry))),
        id: Some(Id::Number(feature.id.into())),
        properties,
        foreign_members: None,
    })
}

impl FeatureStore for GeoJsonStore {
    fn read(&self, path: &Path, layers: Option<&[&str]>) -> Result<FeatureSet> {
        let available = self.layers(path)?;
        let selected: Vec<&String> = match layers {
            Some(filter) => {
                for wanted in filter {
                    if !available.iter().any(|l| l == wanted) {
                        debug!("{}: no layer {}", path.display(), wanted);
                    }
                }
                available
                    .iter()
                    .filter(|l| filter.contains(&l.as_str()))
                    .collect()
            }
            None => available.iter().collect(),
        };

        let mut union: Option<FeatureSet> = None;
        for layer in selected {
            let next_id = union.as_ref().map_or(0, FeatureSet::next_id);
            let features = self.read_layer(&Self::layer_path(path, layer), next_id)?;
            match union.as_mut() {
                Some(all) => all.extend(features)?,
                None => union = Some(features),
            }
        }
        Ok(union.unwrap_or_else(|| FeatureSet::new(DEFAULT_EPSG)))
    }

    fn write(&self, features: &FeatureSet, path: &Path, layer_name: &str) -> Result<()> {
        features.schema()?;

        let mut foreign_members = JsonObject::new();
        foreign_members.insert("crs".to_string(), crs_member(features.epsg));
        let collection = FeatureCollection {
            bbox: None,
            features: features
                .iter()
                .map(to_geojson_feature)
                .collect::<Result<Vec<_>>>()?,
            foreign_members: Some(foreign_members),
        };

        fs::create_dir_all(path).map_err(|e| Error::store_io(path, e))?;
        let file = Self::layer_path(path, layer_name);
        let bytes = serde_json::to_vec(&collection)?;
        fs::write(&file, bytes).map_err(|e| Error::store_io(&file, e))?;
        debug!("Wrote {} features to {}", features.len(), file.display());
        Ok(())
    }

    fn layers(&self, path: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(path).map_err(|e| Error::store_io(path, e))?;
        let mut layers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::store_io(path, e))?;
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some(LAYER_EXTENSION) {
                continue;
            }
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                layers.push(stem.to_string());
            }
        }
        layers.sort();
        Ok(layers)
    }
}

/// In-memory store keyed by (dataset path, layer)
#[derive(Debug, Default)]
pub struct MemoryStore {
    layers: Mutex<HashMap<(PathBuf, String), FeatureSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(PathBuf, String), FeatureSet>>> {
        self.layers
            .lock()
            .map_err(|_| Error::store_io("<memory>", "store lock poisoned"))
    }
}

impl FeatureStore for MemoryStore {
    fn read(&self, path: &Path, layers: Option<&[&str]>) -> Result<FeatureSet> {
        let names = self.layers(path)?;
        let stored = self.lock()?;
        let mut union: Option<FeatureSet> = None;
        for name in names {
            if let Some(filter) = layers {
                if !filter.contains(&name.as_str()) {
                    continue;
                }
            }
            let Some(features) = stored.get(&(path.to_path_buf(), name)) else {
                continue;
            };
            match union.as_mut() {
                Some(all) => all.extend(features.clone())?,
                None => union = Some(features.clone()),
            }
        }
        Ok(union.unwrap_or_else(|| FeatureSet::new(DEFAULT_EPSG)))
    }

    fn write(&self, features: &FeatureSet, path: &Path, layer_name: &str) -> Result<()> {
        features.schema()?;
        self.lock()?
            .insert((path.to_path_buf(), layer_name.to_string()), features.clone());
        Ok(())
    }

    fn layers(&self, path: &Path) -> Result<Vec<String>> {
        let stored = self.lock()?;
        let mut names: Vec<String> = stored
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, layer)| layer.clone())
            .collect();
        if names.is_empty() {
            return Err(Error::store_io(path, "no such dataset"));
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, Geometry};
    use tempfile::TempDir;

    fn sample_set() -> FeatureSet {
        let mut fs = FeatureSet::new(3857);
        fs.push_geometry(
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 5.0)]),
            Attributes::new().with("name", "morning run").with("elevation_gain", 42_i64),
        );
        fs.push_geometry(
            Geometry::Point(point!(x: 3.0, y: 4.0)),
            Attributes::new().with("name", "stop").with("moving", false),
        );
        fs.push_geometry(
            Geometry::LineString(line_string![(x: 20.0, y: 20.0), (x: 30.0, y: 25.5)]),
            Attributes::new().with("name", "evening ride").with("speed", 7.25),
        );
        fs
    }

    #[test]
    fn test_crs_member_round_trip() {
        assert_eq!(parse_crs_member(&crs_member(3035)), Some(3035));
        assert_eq!(parse_crs_member(&serde_json::json!({"type": "name"})), None);
    }

    #[test]
    fn test_geojson_write_by_kind_and_read_filtered() {
        let dir = TempDir::new().unwrap();
        let store = GeoJsonStore::new();
        let path = dir.path().join("traces_3");

        let written = store.write_by_kind(&sample_set(), &path).unwrap();
        assert_eq!(written, vec!["linestring".to_string(), "point".to_string()]);
        assert!(path.join("linestring.geojson").exists());
        assert_eq!(store.layers(&path).unwrap(), written);

        let lines = store.read(&path, Some(&["linestring"])).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.epsg, 3857);
        let ids: Vec<u64> = lines.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 2]);

        let all = store.read(&path, None).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_geojson_preserves_attribute_types() {
        let dir = TempDir::new().unwrap();
        let store = GeoJsonStore::new();
        store.write(&sample_set(), dir.path(), "mixed").unwrap();

        let read = store.read(dir.path(), None).unwrap();
        let first = &read.features()[0];
        assert_eq!(first.attributes.get("elevation_gain"), Some(&AttributeValue::Integer(42)));
        let third = &read.features()[2];
        assert_eq!(third.attributes.get("speed"), Some(&AttributeValue::Float(7.25)));
        let second = &read.features()[1];
        assert_eq!(second.attributes.get("moving"), Some(&AttributeValue::Boolean(false)));
        let keys: Vec<&str> = first.attributes.keys().collect();
        assert_eq!(keys, vec!["name", "elevation_gain"]);
    }

    #[test]
    fn test_geojson_bad_record_is_dropped() {
        let dir = TempDir::new().unwrap();
        let text = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32633"}},
            "features": [
                {"type": "Feature", "id": 7, "geometry": null, "properties": {}},
                {"type": "Feature", "id": 8, "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                 "properties": {"tags": ["a", "b"]}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                 "properties": {"name": "ok"}}
            ]
        }"#;
        fs::write(dir.path().join("point.geojson"), text).unwrap();

        let read = GeoJsonStore::new().read(dir.path(), None).unwrap();
        assert_eq!(read.epsg, 32633);
        assert_eq!(read.len(), 1);
        assert_eq!(read.features()[0].id, 0);
    }

    #[test]
    fn test_geojson_missing_dataset_is_store_io() {
        match GeoJsonStore::new().read(Path::new("/nonexistent/traces"), None) {
            Err(Error::StoreIo { .. }) => {}
            other => panic!("Expected StoreIo, got {:?}", other),
        }
    }

    #[test]
    fn test_write_rejects_mixed_attribute_types() {
        let mut fs = FeatureSet::new(3857);
        fs.push_geometry(Geometry::Point(point!(x: 0.0, y: 0.0)), Attributes::new().with("n", 1_i64));
        fs.push_geometry(Geometry::Point(point!(x: 1.0, y: 0.0)), Attributes::new().with("n", "one"));
        let store = MemoryStore::new();
        match store.write(&fs, Path::new("mixed"), "point") {
            Err(Error::Schema { attribute, .. }) => assert_eq!(attribute, "n"),
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_store_layers() {
        let store = MemoryStore::new();
        let path = Path::new("traces");
        store.write_by_kind(&sample_set(), path).unwrap();
        assert_eq!(store.layers(path).unwrap(), vec!["linestring", "point"]);
        assert_eq!(store.read(path, Some(&["point"])).unwrap().len(), 1);
        assert_eq!(store.read(path, None).unwrap().len(), 3);
        assert!(store.read(Path::new("other"), None).is_err());
    }
}
