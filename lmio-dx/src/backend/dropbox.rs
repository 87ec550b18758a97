//! Dropbox (API v1) backend
//!
//! Owns the session state for one access token: active mode, assets root,
//! current catalog and template, plus the three request caches. Cache maps are
//! only ever touched through this type.

use super::cache::{FlightCache, Retention};
use super::download::Download;
use super::transport::{HttpTransport, Transport};
use super::{Backend, Content, DirectoryEntry, Encoding, ListOptions};
use crate::catalog::Catalog;
use crate::geometry::{Geometry, GeometryFormat};
use crate::mode::{Mode, TextureSource};
use crate::template::{self, Template, TEMPLATE_EXTENSIONS};
use crate::texture::DecodedImage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lmio_common::config::BackendConfig;
use lmio_common::paths::{basename, join};
use lmio_common::preferences::keys;
use lmio_common::{Error, Preferences, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value stored under `BACKEND_TYPE`
pub const BACKEND_TYPE: &str = "DROPBOX";

/// Raw metadata answer for a path, cached unfiltered
#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub is_dir: bool,
    #[serde(default)]
    pub contents: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    url: String,
    expires: String,
}

/// A resolved short-lived media URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrl {
    pub url: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Session {
    mode: Mode,
    assets_path: Option<String>,
    catalog: Catalog,
    /// At most one entry: the active template by name
    templates: HashMap<String, Template>,
    template_path: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    api_url: String,
    content_url: String,
    prefs: Preferences,
    session: Mutex<Session>,
    listings: Arc<FlightCache<Arc<Listing>>>,
    media: Arc<FlightCache<MediaUrl>>,
    images: Arc<FlightCache<DecodedImage>>,
    /// Ticket of the latest `set_assets` call
    rebuilds: AtomicU64,
}

/// Dropbox session; clones share the same state and caches
#[derive(Clone)]
pub struct DropboxBackend {
    inner: Arc<Inner>,
}

impl DropboxBackend {
    pub fn new(transport: Arc<dyn Transport>, config: &BackendConfig, prefs: Preferences) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                api_url: config.api_url.trim_end_matches('/').to_string(),
                content_url: config.content_url.trim_end_matches('/').to_string(),
                prefs,
                session: Mutex::new(Session::default()),
                listings: FlightCache::new("listing", Retention::Keep),
                media: FlightCache::new("media", Retention::Keep),
                images: FlightCache::new("image", Retention::InFlightOnly),
                rebuilds: AtomicU64::new(0),
            }),
        }
    }

    /// Open an HTTP session with `token`, recording backend type and token as preferences
    pub fn connect(config: &BackendConfig, token: &str, prefs: Preferences) -> Result<Self> {
        let transport = HttpTransport::new(
            Some(token.to_string()),
            Duration::from_secs(config.timeout_secs),
        )?;

        prefs.set(
            [
                (keys::BACKEND_TYPE, json!(BACKEND_TYPE)),
                (keys::DROPBOX_TOKEN, json!(token)),
            ],
            true,
        )?;

        Ok(Self::new(Arc::new(transport), config, prefs))
    }

    /// Re-apply mode, template and assets root saved by a previous session
    ///
    /// The template is rebuilt from its persisted content, so no request is
    /// made; the catalog itself is rebuilt later through `fetch_collection`.
    pub fn restore(&self) -> Result<()> {
        let prefs = &self.inner.prefs;

        let mode = Mode::parse_or(prefs.get_str(keys::DROPBOX_MODE).as_deref(), Mode::Image);
        self.session().mode = mode;

        if let (Some(path), Some(content)) = (
            prefs.get_str(keys::DROPBOX_TEMPLATE_PATH),
            prefs.get(keys::DROPBOX_TEMPLATE_CONTENT),
        ) {
            let template = Template::from_json(&content)?;
            self.install_template(&path, template);
        }

        if let Some(path) = prefs.get_str(keys::DROPBOX_ASSETS_PATH) {
            self.session().assets_path = Some(path);
        }

        debug!(mode = %mode, "Restored Dropbox session from preferences");
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.session().mode
    }

    pub fn assets_path(&self) -> Option<String> {
        self.session().assets_path.clone()
    }

    pub fn catalog(&self) -> Catalog {
        self.session().catalog.clone()
    }

    pub fn template(&self, name: &str) -> Option<Template> {
        self.session().templates.get(name).cloned()
    }

    pub fn template_path(&self) -> Option<String> {
        self.session().template_path.clone()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.inner.prefs
    }

    /// Switch mode; anything but `image`/`mesh` keeps the current one
    pub fn set_mode(&self, mode: &str) -> Result<Mode> {
        let mode = {
            let mut session = self.session();
            session.mode = Mode::parse_or(Some(mode), session.mode);
            session.mode
        };

        self.inner
            .prefs
            .set([(keys::DROPBOX_MODE, json!(mode.as_str()))], true)?;
        Ok(mode)
    }

    /// Make the template at `path` the only active one
    ///
    /// `inline` is the template's stored JSON form and skips the download.
    /// On any failure the previous template stays active.
    pub async fn set_template(&self, path: &str, inline: Option<Value>) -> Result<String> {
        let parser = template::ensure_supported(path)?;

        let template = match inline {
            Some(value) => Template::from_json(&value)?,
            None => match self.download(path, Encoding::Text).await? {
                Content::Text(text) => parser(&text)?,
                Content::Binary(_) => {
                    return Err(Error::Parse(format!("{} is not a text file", path)))
                }
            },
        };

        self.inner.prefs.set(
            [
                (keys::DROPBOX_TEMPLATE_PATH, json!(path)),
                (keys::DROPBOX_TEMPLATE_CONTENT, template.to_json()),
            ],
            true,
        )?;

        let name = self.install_template(path, template);
        info!(template = %name, path = %path, "Template changed");
        Ok(name)
    }

    fn install_template(&self, path: &str, template: Template) -> String {
        let name = template::template_name(path);
        let mut session = self.session();
        session.templates = HashMap::from([(name.clone(), template)]);
        session.template_path = Some(path.to_string());
        name
    }

    /// Rebuild the catalog from `path` in `mode`, replacing the previous one
    ///
    /// The listing always bypasses the cache. Session state only changes once
    /// the listing succeeded, and only for the most recent call: a rebuild
    /// overtaken by a later one fails with [`Error::Aborted`] and installs
    /// nothing.
    pub async fn set_assets(&self, path: &str, mode: Mode) -> Result<Vec<String>> {
        let ticket = self.inner.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;

        let options =
            ListOptions::files_with(mode.traits().listing_extensions).bypass_cache();
        let entries = self.list(path, &options).await?;
        let catalog = Catalog::from_listing(mode, &entries);
        let ids = catalog.asset_ids();

        {
            let mut session = self.session();
            if self.inner.rebuilds.load(Ordering::SeqCst) != ticket {
                debug!(collection = %path, "Catalog listing superseded, not installed");
                return Err(Error::Aborted(format!("Catalog rebuild of {}", path)));
            }
            session.mode = mode;
            session.assets_path = Some(path.to_string());
            session.catalog = catalog;
        }

        self.inner.prefs.set(
            [
                (keys::DROPBOX_MODE, json!(mode.as_str())),
                (keys::DROPBOX_ASSETS_PATH, json!(path)),
            ],
            true,
        )?;

        info!(collection = %path, mode = %mode, assets = ids.len(), "Catalog rebuilt");
        Ok(ids)
    }

    /// List a directory through the listing cache
    pub async fn list(&self, path: &str, options: &ListOptions) -> Result<Vec<DirectoryEntry>> {
        let this = self.clone();
        let key = path.to_string();

        let listing = self
            .inner
            .listings
            .get_or_fetch(path, options.bypass_cache, move || async move {
                let listing = this.fetch_listing(&key).await?;
                Ok((Arc::new(listing), None))
            })
            .await?;

        if !listing.is_dir {
            return Err(Error::Validation(format!("{} is not a directory", path)));
        }

        Ok(listing
            .contents
            .iter()
            .filter(|entry| options.keeps(entry))
            .cloned()
            .collect())
    }

    async fn fetch_listing(&self, path: &str) -> Result<Listing> {
        let url = format!("{}/metadata/auto{}", self.inner.api_url, path);
        let value = self
            .inner
            .transport
            .get_json(&url, &[("list", "true")])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch a file's content; never cached
    pub async fn download(&self, path: &str, encoding: Encoding) -> Result<Content> {
        let url = format!("{}/files/auto{}", self.inner.content_url, path);
        let bytes = self.inner.transport.get_bytes(&url).await?;

        match encoding {
            Encoding::Binary => Ok(Content::Binary(bytes)),
            Encoding::Text => String::from_utf8(bytes)
                .map(Content::Text)
                .map_err(|_| Error::Parse(format!("{} is not valid UTF-8", path))),
        }
    }

    /// Resolve a short-lived direct URL for `path`
    pub async fn media_url(&self, path: &str, bypass_cache: bool) -> Result<MediaUrl> {
        let this = self.clone();
        let key = path.to_string();

        self.inner
            .media
            .get_or_fetch(path, bypass_cache, move || async move {
                let media = this.fetch_media_url(&key).await?;
                let expires = media.expires;
                Ok((media, Some(expires)))
            })
            .await
    }

    async fn fetch_media_url(&self, path: &str) -> Result<MediaUrl> {
        let url = format!("{}/media/auto{}", self.inner.api_url, path);
        let value = self.inner.transport.get_json(&url, &[]).await?;
        let response: MediaResponse = serde_json::from_value(value)?;

        let expires = parse_expiry(&response.expires).unwrap_or_else(|| {
            warn!(path = %path, expires = %response.expires, "Unreadable media expiry, not caching");
            Utc::now()
        });

        Ok(MediaUrl {
            url: response.url,
            expires,
        })
    }

    /// Locate template files under `root`, walking the whole tree
    pub async fn find_templates(&self, root: &str) -> Result<Vec<String>> {
        let options = ListOptions {
            extensions: TEMPLATE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ..ListOptions::default()
        };

        let mut found = Vec::new();
        let mut pending = VecDeque::from([root.to_string()]);

        while let Some(dir) = pending.pop_front() {
            for entry in self.list(&dir, &options).await? {
                if entry.is_dir {
                    pending.push_back(entry.path);
                } else {
                    found.push(entry.path);
                }
            }
        }

        Ok(found)
    }

    /// Account details; doubles as a token check
    pub async fn account_info(&self) -> Result<Value> {
        let url = format!("{}/account/info", self.inner.api_url);
        self.inner.transport.get_json(&url, &[]).await
    }

    /// Forget cached listing and media URL for `path`
    pub fn invalidate(&self, path: &str) {
        let listing = self.inner.listings.invalidate(path);
        let media = self.inner.media.invalidate(path);
        debug!(path = %path, listing, media, "Invalidated cache entries");
    }

    pub fn listing_cache(&self) -> &FlightCache<Arc<Listing>> {
        &self.inner.listings
    }

    pub fn media_cache(&self) -> &FlightCache<MediaUrl> {
        &self.inner.media
    }

    pub fn image_cache(&self) -> &FlightCache<DecodedImage> {
        &self.inner.images
    }

    fn asset_path(&self, asset_id: &str) -> Result<String> {
        let root = self
            .session()
            .assets_path
            .clone()
            .ok_or_else(|| Error::State("No assets directory selected".to_string()))?;
        Ok(join(&root, asset_id))
    }

    fn landmark_path(&self, asset_id: &str, template: &str) -> Result<String> {
        let root = self
            .session()
            .assets_path
            .clone()
            .ok_or_else(|| Error::State("No assets directory selected".to_string()))?;
        Ok(landmark_path(&root, asset_id, template))
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// `{assets}/landmarks/{asset_id}_{template}.ljson`
pub fn landmark_path(assets_path: &str, asset_id: &str, template: &str) -> String {
    join(
        assets_path,
        &format!("landmarks/{}_{}.ljson", asset_id, template),
    )
}

/// Media expiry as sent by the API (RFC 2822), RFC 3339 also accepted
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Run a decoder off the async workers
async fn decode_blocking<T, F>(decode: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(decode)
        .await
        .map_err(|e| Error::Parse(format!("Decoder task failed: {}", e)))?
}

#[async_trait]
impl Backend for DropboxBackend {
    async fn fetch_mode(&self) -> Result<Mode> {
        Ok(self.mode())
    }

    async fn fetch_templates(&self) -> Result<Vec<String>> {
        Ok(self.session().templates.keys().cloned().collect())
    }

    async fn fetch_collections(&self) -> Result<Vec<String>> {
        Ok(self.assets_path().into_iter().collect())
    }

    async fn fetch_collection(&self, collection: &str, mode: Mode) -> Result<Vec<String>> {
        self.set_assets(collection, mode).await
    }

    /// Decoded image, with concurrent requests for one path sharing a single attempt
    async fn fetch_img(&self, path: &str) -> Result<DecodedImage> {
        let this = self.clone();
        let key = path.to_string();

        self.inner
            .images
            .get_or_fetch(path, false, move || async move {
                let media = this.media_url(&key, false).await?;
                let bytes = this.inner.transport.fetch_url(&media.url).await;
                let bytes = bytes.map_err(|e| {
                    warn!(path = %key, error = %e, "Failed to fetch image");
                    e
                })?;
                let image = decode_blocking(move || DecodedImage::decode(&key, &bytes)).await?;
                Ok((image, None))
            })
            .await
    }

    async fn fetch_texture(&self, asset_id: &str) -> Result<DecodedImage> {
        let path = self.asset_path(asset_id)?;

        let texture = match self.mode().traits().texture_source {
            TextureSource::AssetItself => path,
            TextureSource::Companion => self
                .session()
                .catalog
                .texture_for(&path)
                .map(str::to_string)
                .ok_or_else(|| Error::NotFound(format!("No texture for {}", asset_id)))?,
        };

        self.fetch_img(&texture).await
    }

    async fn fetch_thumbnail(&self, asset_id: &str) -> Result<DecodedImage> {
        Err(Error::Validation(format!(
            "Thumbnails are not available from Dropbox ({})",
            asset_id
        )))
    }

    fn fetch_geometry(&self, asset_id: &str) -> Download<Geometry> {
        let path = match self.asset_path(asset_id) {
            Ok(path) => path,
            Err(e) => return Download::failed(e),
        };
        let format = match GeometryFormat::from_path(&path) {
            Ok(format) => format,
            Err(e) => return Download::failed(e),
        };

        let this = self.clone();
        let what = path.clone();

        Download::new(what, async move {
            let data = match format {
                GeometryFormat::Obj => this.download(&path, Encoding::Text).await?.into_bytes(),
                GeometryFormat::Stl => {
                    let media = this.media_url(&path, false).await?;
                    this.inner.transport.fetch_url(&media.url).await?
                }
            };

            decode_blocking(move || format.decode(&data)).await.map_err(|e| {
                warn!(path = %path, error = %e, "Failed to parse mesh file");
                e
            })
        })
    }

    async fn fetch_landmark_group(&self, asset_id: &str, template: &str) -> Result<Value> {
        let path = self.landmark_path(asset_id, template)?;

        let loaded = match self.download(&path, Encoding::Text).await {
            Ok(Content::Text(text)) => serde_json::from_str(&text).map_err(Error::from),
            Ok(Content::Binary(_)) => Err(Error::Parse(format!("{} is not text", path))),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(path = %path, error = %e, "No stored landmarks, using empty group");
                self.empty_landmark_group(template)
            }
        }
    }

    async fn save_landmark_group(
        &self,
        asset_id: &str,
        template: &str,
        payload: &Value,
    ) -> Result<()> {
        let path = self.landmark_path(asset_id, template)?;
        let url = format!("{}/files_put/auto{}", self.inner.content_url, path);
        self.inner.transport.put_json(&url, payload).await?;

        info!(asset = %asset_id, template = %template, "Landmarks saved");
        Ok(())
    }

    fn empty_landmark_group(&self, template: &str) -> Result<Value> {
        let session = self.session();
        let dim = session.mode.traits().landmark_dim;
        session
            .templates
            .get(template)
            .map(|t| t.empty_ljson(dim))
            .ok_or_else(|| Error::State(format!("Unknown template '{}'", template)))
    }
}

impl std::fmt::Debug for DropboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session();
        f.debug_struct("DropboxBackend")
            .field("mode", &session.mode)
            .field("assets_path", &session.assets_path)
            .field("assets", &session.catalog.len())
            .field("template", &session.template_path.as_deref().map(|p| basename(p, false)))
            .finish()
    }
}
