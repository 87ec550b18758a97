//! Mesh geometry decoding
//!
//! Only what a viewer needs to place landmarks: positions, triangle indices and
//! optional texture coordinates.

mod obj;
mod stl;

pub use obj::parse_obj;
pub use stl::parse_stl;

use lmio_common::paths::extname;
use lmio_common::{Error, Result};

/// Decoded triangle mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    /// Per-vertex texture coordinates, empty when the file has none
    pub uvs: Vec<[f32; 2]>,
}

impl Geometry {
    pub fn triangle_count(&self) -> usize {
        self.faces.len()
    }

    /// Axis-aligned bounds, `None` for an empty mesh
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(mut lo, mut hi), v| {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(v[axis]);
                hi[axis] = hi[axis].max(v[axis]);
            }
            (lo, hi)
        }))
    }
}

/// Mesh file formats with a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFormat {
    /// Wavefront OBJ, fetched as text
    Obj,
    /// STL (binary or ASCII), fetched as bytes through a media URL
    Stl,
}

impl GeometryFormat {
    pub fn from_path(path: &str) -> Result<Self> {
        match extname(path).as_str() {
            "obj" => Ok(GeometryFormat::Obj),
            "stl" => Ok(GeometryFormat::Stl),
            other => Err(Error::Validation(format!(
                "Unsupported mesh extension '{}' for {}",
                other, path
            ))),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Geometry> {
        match self {
            GeometryFormat::Obj => {
                let text = std::str::from_utf8(data)
                    .map_err(|_| Error::Parse("OBJ file is not valid UTF-8".to_string()))?;
                parse_obj(text)
            }
            GeometryFormat::Stl => parse_stl(data),
        }
    }
}
