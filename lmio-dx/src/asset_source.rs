//! Ordered asset ids of the active collection and asset payload loading

use crate::backend::{Backend, DownloadHandle};
use crate::geometry::Geometry;
use crate::mode::Mode;
use crate::texture::DecodedImage;
use futures::future::{BoxFuture, FutureExt};
use lmio_common::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

/// Asset ids of one catalog plus the navigation cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSource {
    collection: String,
    mode: Mode,
    ids: Vec<String>,
    index: Option<usize>,
}

impl AssetSource {
    pub fn new(collection: &str, mode: Mode, ids: Vec<String>) -> Self {
        Self {
            collection: collection.to_string(),
            mode,
            ids,
            index: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn id_at(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    pub fn asset_index(&self, asset_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == asset_id)
    }

    pub fn has_successor(&self) -> bool {
        matches!(self.index, Some(i) if i + 1 < self.ids.len())
    }

    pub fn has_predecessor(&self) -> bool {
        matches!(self.index, Some(i) if i > 0)
    }

    /// Fail with a state error unless `0 <= index < len`
    pub fn check_index(&self, index: usize) -> Result<()> {
        if index < self.ids.len() {
            Ok(())
        } else {
            Err(Error::State(format!(
                "Error trying to set index to {} - needs to be in the range 0-{}",
                index,
                self.ids.len()
            )))
        }
    }

    pub fn set_index(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.index = Some(index);
        Ok(())
    }

    /// Move the cursor back without validation (reverting a failed switch)
    pub(crate) fn restore_index(&mut self, index: Option<usize>) {
        self.index = index;
    }
}

/// Everything needed to display an asset
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
    Image(DecodedImage),
    Mesh {
        geometry: Arc<Geometry>,
        /// Absent when the mesh has no companion image or it failed to load
        texture: Option<DecodedImage>,
    },
}

impl AssetPayload {
    pub fn texture(&self) -> Option<&DecodedImage> {
        match self {
            AssetPayload::Image(image) => Some(image),
            AssetPayload::Mesh { texture, .. } => texture.as_ref(),
        }
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        match self {
            AssetPayload::Image(_) => None,
            AssetPayload::Mesh { geometry, .. } => Some(geometry),
        }
    }
}

/// Asset payload on its way; mesh loads can be aborted
pub struct LoadingAsset {
    inner: BoxFuture<'static, Result<AssetPayload>>,
    abort: Option<DownloadHandle>,
}

impl LoadingAsset {
    pub fn abort_handle(&self) -> Option<DownloadHandle> {
        self.abort.clone()
    }
}

impl Future for LoadingAsset {
    type Output = Result<AssetPayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

/// Start loading the payload of `asset_id` the way `mode` displays it
///
/// Image mode fetches the image itself. Mesh mode fetches geometry and the
/// companion texture side by side; a missing texture is not an error.
pub fn load_asset(backend: Arc<dyn Backend>, mode: Mode, asset_id: &str) -> LoadingAsset {
    let asset_id = asset_id.to_string();

    match mode {
        Mode::Image => LoadingAsset {
            inner: async move { backend.fetch_texture(&asset_id).await.map(AssetPayload::Image) }
                .boxed(),
            abort: None,
        },
        Mode::Mesh => {
            let geometry = backend.fetch_geometry(&asset_id);
            let abort = Some(geometry.handle());

            let inner = async move {
                let texture = async {
                    match backend.fetch_texture(&asset_id).await {
                        Ok(texture) => Some(texture),
                        Err(e) => {
                            warn!(asset = %asset_id, error = %e, "Mesh shown without texture");
                            None
                        }
                    }
                };
                let (geometry, texture) = tokio::join!(geometry, texture);

                Ok(AssetPayload::Mesh {
                    geometry: Arc::new(geometry?),
                    texture,
                })
            }
            .boxed();

            LoadingAsset { inner, abort }
        }
    }
}
