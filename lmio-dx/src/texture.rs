//! Image decoding for textures and image-mode assets

use image::GenericImageView;
use lmio_common::{Error, Result};
use std::sync::Arc;

/// RGBA8 pixels of a decoded image
///
/// Pixels sit behind an `Arc` so every caller sharing one in-flight decode
/// gets the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<Vec<u8>>,
}

impl DecodedImage {
    pub fn decode(source: &str, data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data)
            .map_err(|e| Error::Parse(format!("Failed to decode image {}: {}", source, e)))?;
        let (width, height) = img.dimensions();

        Ok(Self {
            source: source.to_string(),
            width,
            height,
            pixels: Arc::new(img.to_rgba8().into_raw()),
        })
    }
}
