//! Data file manifest and loaders.
//!
//! Startup only checks that each data file is present and readable and that
//! each script directory exists; parsing belongs to the game systems that
//! own those files.

use crate::error::StageError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    File,
    Directory,
}

/// One entry of the startup manifest, relative to the data directory.
#[derive(Debug, Clone, Copy)]
pub struct Asset {
    pub path: &'static str,
    pub kind: AssetKind,
}

impl Asset {
    const fn file(path: &'static str) -> Self {
        Self {
            path,
            kind: AssetKind::File,
        }
    }

    const fn dir(path: &'static str) -> Self {
        Self {
            path,
            kind: AssetKind::Directory,
        }
    }
}

/// Everything loaded before the map, in load order.
pub const MANIFEST: &[Asset] = &[
    Asset::file("items/items.otb"),
    Asset::file("items/items.xml"),
    Asset::file("global.lua"),
    Asset::file("stages.lua"),
    Asset::file("startup/startup.lua"),
    Asset::file("npclib/load.lua"),
    Asset::dir("scripts/lib"),
    Asset::file("XML/vocations.xml"),
    Asset::file("XML/events.xml"),
    Asset::file("XML/outfits.xml"),
    Asset::file("XML/familiars.xml"),
    Asset::file("XML/imbuements.xml"),
    Asset::file("modules/modules.xml"),
    Asset::file("events/events.xml"),
    Asset::dir("scripts"),
    Asset::dir("monster"),
    Asset::dir("npclua"),
];

/// Map files start with a four byte identifier: all zeroes or `OTBM`.
const MAP_IDENTIFIERS: [[u8; 4]; 2] = [[0, 0, 0, 0], *b"OTBM"];

fn load_error(path: &Path, reason: impl Into<String>) -> StageError {
    StageError::ResourceLoad {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Loads one manifest entry. Returns the file size, or the number of entries
/// for a directory.
pub fn load(data_dir: &Path, asset: &Asset) -> Result<u64, StageError> {
    let path = data_dir.join(asset.path);
    match asset.kind {
        AssetKind::File => {
            let bytes = fs::read(&path).map_err(|e| load_error(&path, e.to_string()))?;
            if bytes.is_empty() {
                return Err(load_error(&path, "file is empty"));
            }
            debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes.len() as u64)
        }
        AssetKind::Directory => {
            let entries = fs::read_dir(&path).map_err(|e| load_error(&path, e.to_string()))?;
            let count = entries.filter_map(Result::ok).count() as u64;
            debug!("Loaded {} ({} entries)", path.display(), count);
            Ok(count)
        }
    }
}

/// `<data_dir>/world/<name>.otbm`
pub fn map_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join("world").join(format!("{}.otbm", name))
}

/// Checks that a map file exists and carries a map identifier.
pub fn load_map(path: &Path) -> Result<u64, StageError> {
    let bytes = fs::read(path).map_err(|e| load_error(path, e.to_string()))?;
    match bytes.get(..4) {
        Some(identifier) if MAP_IDENTIFIERS.iter().any(|id| id == identifier) => {
            Ok(bytes.len() as u64)
        }
        Some(_) => Err(load_error(path, "unknown map identifier")),
        None => Err(load_error(path, "file too short")),
    }
}

/// Creates a data directory that satisfies the whole manifest plus a main
/// map named `map_name`. Used by tests and to scaffold a fresh install.
pub fn scaffold(data_dir: &Path, map_name: &str) -> std::io::Result<()> {
    for asset in MANIFEST {
        let path = data_dir.join(asset.path);
        match asset.kind {
            AssetKind::File => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, b"-- placeholder\n")?;
            }
            AssetKind::Directory => fs::create_dir_all(&path)?,
        }
    }

    let map = map_path(data_dir, map_name);
    if let Some(parent) = map.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut contents = b"OTBM".to_vec();
    contents.extend_from_slice(&[0u8; 12]);
    fs::write(map, contents)
}
