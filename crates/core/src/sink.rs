//! Tile sinks: the only place tile output paths are built and directories created.
//!
//! [`DirectorySink`] lays a pyramid out on disk as
//!
//! ```text
//! <root>/metadata.json
//! <root>/<z>/<x>/<y>.geojson
//! ```
//!
//! Tile parents are created with `create_dir_all`, which succeeds when another
//! writer created the same directory first, so tiles can be written from many
//! threads. [`MemorySink`] keeps encoded tiles in a map for tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use serde::Serialize;

use crate::document::TileDocument;
use crate::pyramid::PyramidMetadata;
use crate::tile::TileCoord;
use crate::{Error, Result};

/// File name of the pyramid metadata record
pub const METADATA_FILE: &str = "metadata.json";

/// Extension of tile files
pub const TILE_EXTENSION: &str = "geojson";

/// Destination for tiles and the pyramid metadata record
pub trait TileSink: Send + Sync {
    /// Write one non-empty tile
    fn write_tile(&self, coord: TileCoord, document: &TileDocument) -> Result<()>;

    /// Write the pyramid metadata record
    fn write_metadata(&self, metadata: &PyramidMetadata) -> Result<()>;
}

/// Pretty-print with 3-space indentation
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Sink writing a pyramid directory tree
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<z>/<x>/<y>.geojson`
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, TILE_EXTENSION))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::store_io(parent, e))?;
        }
        fs::write(path, bytes).map_err(|e| Error::store_io(path, e))
    }
}

impl TileSink for DirectorySink {
    fn write_tile(&self, coord: TileCoord, document: &TileDocument) -> Result<()> {
        let path = self.tile_path(coord);
        Self::write_file(&path, &document.to_json_bytes()?)?;
        debug!("Wrote tile {} ({} features)", coord, document.len());
        Ok(())
    }

    fn write_metadata(&self, metadata: &PyramidMetadata) -> Result<()> {
        let path = self.metadata_path();
        Self::write_file(&path, &to_pretty_json(metadata)?)
    }
}

/// Sink holding encoded tiles in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    tiles: Mutex<BTreeMap<TileCoord, Vec<u8>>>,
    metadata: Mutex<Option<PyramidMetadata>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded tiles, ordered by coordinate
    pub fn tiles(&self) -> BTreeMap<TileCoord, Vec<u8>> {
        self.tiles.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Decoded document of one tile
    pub fn document(&self, coord: TileCoord) -> Option<TileDocument> {
        let tiles = self.tiles.lock().ok()?;
        TileDocument::from_json_slice(tiles.get(&coord)?).ok()
    }

    pub fn metadata(&self) -> Option<PyramidMetadata> {
        self.metadata.lock().ok()?.clone()
    }
}

impl TileSink for MemorySink {
    fn write_tile(&self, coord: TileCoord, document: &TileDocument) -> Result<()> {
        let bytes = document.to_json_bytes()?;
        self.tiles
            .lock()
            .map_err(|_| Error::store_io("<memory>", "tile map lock poisoned"))?
            .insert(coord, bytes);
        Ok(())
    }

    fn write_metadata(&self, metadata: &PyramidMetadata) -> Result<()> {
        *self
            .metadata
            .lock()
            .map_err(|_| Error::store_io("<memory>", "metadata lock poisoned"))? = Some(metadata.clone());
        Ok(())
    }
}
