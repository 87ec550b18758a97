//! Remote backend client
//!
//! [`Backend`] is the surface the navigator drives; [`DropboxBackend`] is the
//! one implementation, talking to the file API through a [`Transport`].

pub mod auth;
pub mod cache;
pub mod download;
pub mod dropbox;
pub mod transport;

pub use cache::{FlightCache, Retention, SlotState};
pub use download::{Download, DownloadHandle};
pub use dropbox::{DropboxBackend, Listing, MediaUrl};
pub use transport::{HttpTransport, Transport};

use crate::geometry::Geometry;
use crate::mode::Mode;
use crate::texture::DecodedImage;
use async_trait::async_trait;
use lmio_common::paths::{basename, extname, is_hidden};
use lmio_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub is_dir: bool,
}

impl DirectoryEntry {
    pub fn name(&self) -> &str {
        basename(&self.path, false)
    }
}

/// Filters applied to a directory listing
///
/// The extension allow-list only applies to files; an empty list keeps every
/// file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub folders_only: bool,
    pub files_only: bool,
    pub show_hidden: bool,
    pub extensions: Vec<String>,
    pub bypass_cache: bool,
}

impl ListOptions {
    pub fn files_with(extensions: &[&str]) -> Self {
        Self {
            files_only: true,
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn folders() -> Self {
        Self {
            folders_only: true,
            ..Self::default()
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn keeps(&self, entry: &DirectoryEntry) -> bool {
        if !self.show_hidden && is_hidden(&entry.path) {
            return false;
        }

        if entry.is_dir {
            return !self.files_only;
        }

        if self.folders_only {
            return false;
        }

        self.extensions.is_empty() || self.extensions.contains(&extname(&entry.path))
    }
}

/// How a download's body is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Binary,
}

/// Body of a downloaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Text(text) => text.into_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }
}

/// Operations the navigator needs from a remote asset store
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_mode(&self) -> Result<Mode>;

    /// Names of the templates that can be annotated with
    async fn fetch_templates(&self) -> Result<Vec<String>>;

    /// Collections (asset roots) that can be browsed
    async fn fetch_collections(&self) -> Result<Vec<String>>;

    /// Rebuild the catalog of `collection` in `mode`; asset ids in catalog order
    ///
    /// Only the latest of overlapping calls may take effect. One overtaken by
    /// a later call fails with [`Error::Aborted`](lmio_common::Error::Aborted).
    async fn fetch_collection(&self, collection: &str, mode: Mode) -> Result<Vec<String>>;

    async fn fetch_img(&self, path: &str) -> Result<DecodedImage>;

    async fn fetch_texture(&self, asset_id: &str) -> Result<DecodedImage>;

    async fn fetch_thumbnail(&self, asset_id: &str) -> Result<DecodedImage>;

    /// Mesh of an asset; the returned download can be aborted
    fn fetch_geometry(&self, asset_id: &str) -> Download<Geometry>;

    /// Landmarks of an asset under a template, or the template's empty payload
    async fn fetch_landmark_group(&self, asset_id: &str, template: &str) -> Result<Value>;

    async fn save_landmark_group(&self, asset_id: &str, template: &str, payload: &Value)
        -> Result<()>;

    /// Payload with every landmark of `template` unset, for the current mode
    fn empty_landmark_group(&self, template: &str) -> Result<Value>;
}
