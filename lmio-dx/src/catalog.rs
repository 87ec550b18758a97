//! Asset catalog: classifies a collection listing into ordered assets
//!
//! A catalog is built from one filtered listing and never patched afterwards;
//! the backend swaps in a freshly built one on every collection or mode change.

use crate::backend::DirectoryEntry;
use crate::mode::{Mode, IMAGE_EXTENSIONS, MATERIAL_EXTENSION, MESH_ASSET_EXTENSIONS};
use lmio_common::paths::{basename, extname, strip_extension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// What an asset file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Obj,
    Stl,
}

impl AssetKind {
    /// Classify by extension; `None` for files that are never assets
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = extname(path);
        match ext.as_str() {
            "obj" => Some(AssetKind::Obj),
            "stl" => Some(AssetKind::Stl),
            e if IMAGE_EXTENSIONS.contains(&e) => Some(AssetKind::Image),
            _ => None,
        }
    }
}

/// One asset of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetDescriptor {
    pub path: String,
    pub kind: AssetKind,
    /// Companion image (mesh mode only)
    pub texture: Option<String>,
    /// Companion `.mtl` (mesh mode only)
    pub material: Option<String>,
}

impl AssetDescriptor {
    /// Stable id: the file name including its extension
    pub fn id(&self) -> &str {
        basename(&self.path, false)
    }
}

/// Ordered assets of one collection plus their companion files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    assets: Vec<AssetDescriptor>,
    textures: HashMap<String, String>,
    materials: HashMap<String, String>,
}

impl Catalog {
    /// Build from a listing already filtered to the mode's extensions
    pub fn from_listing(mode: Mode, entries: &[DirectoryEntry]) -> Self {
        let paths: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.path.clone())
            .collect();
        (mode.traits().build_catalog)(&paths)
    }

    pub fn assets(&self) -> &[AssetDescriptor] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn texture_for(&self, asset_path: &str) -> Option<&str> {
        self.textures.get(asset_path).map(String::as_str)
    }

    pub fn material_for(&self, asset_path: &str) -> Option<&str> {
        self.materials.get(asset_path).map(String::as_str)
    }

    pub fn textures(&self) -> &HashMap<String, String> {
        &self.textures
    }

    pub fn materials(&self) -> &HashMap<String, String> {
        &self.materials
    }
}

/// Image mode: every listed file is an asset, listing order preserved
pub fn build_image_catalog(paths: &[String]) -> Catalog {
    let assets = paths
        .iter()
        .map(|p| AssetDescriptor {
            path: p.clone(),
            kind: AssetKind::from_path(p).unwrap_or(AssetKind::Image),
            texture: None,
            material: None,
        })
        .collect();

    Catalog {
        assets,
        ..Catalog::default()
    }
}

/// Mesh mode: `.obj`/`.stl` files are assets; same-stem siblings in the same
/// listing become their texture (first image extension by priority) and material
pub fn build_mesh_catalog(paths: &[String]) -> Catalog {
    let present: HashSet<&str> = paths.iter().map(String::as_str).collect();
    let mut catalog = Catalog::default();

    for path in paths {
        if !MESH_ASSET_EXTENSIONS.contains(&extname(path).as_str()) {
            continue;
        }

        let stem = strip_extension(path);

        let texture = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| format!("{}.{}", stem, ext))
            .find(|candidate| present.contains(candidate.as_str()));

        let material = Some(format!("{}.{}", stem, MATERIAL_EXTENSION))
            .filter(|candidate| present.contains(candidate.as_str()));

        if let Some(t) = &texture {
            catalog.textures.insert(path.clone(), t.clone());
        }
        if let Some(m) = &material {
            catalog.materials.insert(path.clone(), m.clone());
        }

        catalog.assets.push(AssetDescriptor {
            path: path.clone(),
            kind: AssetKind::from_path(path).unwrap_or(AssetKind::Obj),
            texture,
            material,
        });
    }

    catalog
}
