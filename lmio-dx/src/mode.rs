//! Collection modes and their per-mode behaviour table

use crate::catalog::{self, Catalog};
use lmio_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Image extensions in texture-lookup priority order
pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// Extensions that are assets in mesh mode
pub const MESH_ASSET_EXTENSIONS: &[&str] = &["obj", "stl"];

/// Material companion extension
pub const MATERIAL_EXTENSION: &str = "mtl";

/// Where a mode finds the texture for an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSource {
    /// The asset file is itself the image
    AssetItself,
    /// A same-stem image sibling recorded at catalog build time
    Companion,
}

/// Asset collection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Image,
    Mesh,
}

/// Static per-mode behaviour
#[derive(Debug)]
pub struct ModeTraits {
    /// Extensions the catalog listing keeps
    pub listing_extensions: &'static [&'static str],
    /// Landmark dimensionality
    pub landmark_dim: usize,
    pub texture_source: TextureSource,
    /// Classifies a filtered listing into the catalog
    pub build_catalog: fn(&[String]) -> Catalog,
}

const IMAGE_TRAITS: ModeTraits = ModeTraits {
    listing_extensions: IMAGE_EXTENSIONS,
    landmark_dim: 2,
    texture_source: TextureSource::AssetItself,
    build_catalog: catalog::build_image_catalog,
};

const MESH_TRAITS: ModeTraits = ModeTraits {
    listing_extensions: &["obj", "stl", "mtl", "jpeg", "jpg", "png"],
    landmark_dim: 3,
    texture_source: TextureSource::Companion,
    build_catalog: catalog::build_mesh_catalog,
};

impl Mode {
    pub fn traits(self) -> &'static ModeTraits {
        match self {
            Mode::Image => &IMAGE_TRAITS,
            Mode::Mesh => &MESH_TRAITS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Image => "image",
            Mode::Mesh => "mesh",
        }
    }

    /// Parse a persisted or user-supplied mode, keeping `current` when unknown
    pub fn parse_or(value: Option<&str>, current: Mode) -> Mode {
        value.and_then(|v| v.parse().ok()).unwrap_or(current)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Mode::Image),
            "mesh" => Ok(Mode::Mesh),
            other => Err(Error::Validation(format!("Unknown mode '{}'", other))),
        }
    }
}
