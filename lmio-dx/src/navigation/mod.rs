//! Asset navigation and synchronization
//!
//! The [`Navigator`] owns the selection (template, collection, mode, asset
//! index) and publishes complete [`NavigationState`] snapshots over a watch
//! channel. An asset becomes current only once both its payload and its
//! landmarks have loaded; every switch carries a generation and a switch that
//! is no longer the latest one is dropped instead of published. Catalog
//! rebuilds carry a generation of their own, and asset steps are refused while
//! one is pending.

mod confirm;
mod state;

pub use confirm::{AlwaysProceed, Confirm};
pub use state::{CurrentAsset, NavPhase, NavigationState};

use crate::asset_source::{load_asset, AssetSource};
use crate::backend::{Backend, DownloadHandle};
use crate::landmarks::{EditLog, LandmarkGroup};
use crate::mode::Mode;
use chrono::Utc;
use lmio_common::events::{EventBus, LmioEvent};
use lmio_common::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const UNSAVED_CHANGES_PROMPT: &str =
    "You have unsaved changes, are you sure you want to leave this asset? (Your changes will be lost)";

/// Startup choices, usually restored from preferences
#[derive(Debug, Clone, Default)]
pub struct NavigatorOptions {
    pub auto_save: bool,
    /// Index to open when nothing is current yet
    pub initial_index: Option<usize>,
    pub preferred_template: Option<String>,
    pub preferred_collection: Option<String>,
}

struct Inner {
    source: Option<AssetSource>,
    /// Edit history per asset id, dropped on every catalog rebuild
    logs: HashMap<String, EditLog>,
    /// Abort handle of the switch being loaded
    in_flight: Option<DownloadHandle>,
    /// Catalog generation of the rebuild still waiting for its listing
    rebuilding: Option<u64>,
    /// Catalog generation the published asset belongs to
    published_catalog: u64,
    initial_index: Option<usize>,
    preferred_template: Option<String>,
    preferred_collection: Option<String>,
}

impl Inner {
    /// The catalog, unless a rebuild is about to replace it
    fn settled_source(&self) -> Option<&AssetSource> {
        self.rebuilding.is_none().then_some(self.source.as_ref()).flatten()
    }
}

pub struct Navigator {
    backend: Arc<dyn Backend>,
    confirm: Arc<dyn Confirm>,
    events: EventBus,
    state: watch::Sender<NavigationState>,
    inner: Mutex<Inner>,
    generation: AtomicU64,
    /// Bumped by every catalog rebuild; asset switches never touch it
    catalog_generation: AtomicU64,
}

impl Navigator {
    pub fn new(
        backend: Arc<dyn Backend>,
        confirm: Arc<dyn Confirm>,
        events: EventBus,
        options: NavigatorOptions,
    ) -> Self {
        let (state, _) = watch::channel(NavigationState {
            auto_save: options.auto_save,
            ..NavigationState::default()
        });

        Self {
            backend,
            confirm,
            events,
            state,
            inner: Mutex::new(Inner {
                source: None,
                logs: HashMap::new(),
                in_flight: None,
                rebuilding: None,
                published_catalog: 0,
                initial_index: options.initial_index,
                preferred_template: options.preferred_template,
                preferred_collection: options.preferred_collection,
            }),
            generation: AtomicU64::new(0),
            catalog_generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> NavigationState {
        self.state.borrow().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Resolve template and collection, then load the first asset
    ///
    /// Failing to list templates or collections is fatal, as is an initial
    /// index outside the catalog.
    pub async fn start(&self) -> Result<Option<usize>> {
        info!("Starting navigator");

        self.resolve_templates(false).await?;
        self.resolve_collections(false).await?;

        let mode = match self.backend.fetch_mode().await {
            Ok(mode) => mode,
            Err(e) => return Err(self.fail(e)),
        };
        self.state.send_modify(|s| s.mode = mode);

        self.reload().await
    }

    /// Fetch the template list and select the preferred one, else the first
    pub async fn resolve_templates(&self, ignore_preset: bool) -> Result<Option<String>> {
        self.set_phase(NavPhase::TemplateResolving);

        let templates = match self.backend.fetch_templates().await {
            Ok(templates) => templates,
            Err(e) => return Err(self.fail(e)),
        };

        let preset = if ignore_preset {
            None
        } else {
            self.lock().preferred_template.clone()
        };
        let selected = pick(&templates, preset.as_deref());

        self.state.send_modify(|s| {
            s.templates = templates;
            s.active_template = selected.clone();
            s.phase = s.settled_phase();
        });

        if let Some(template) = &selected {
            debug!(template = %template, "Template selected");
            self.events.emit_lossy(LmioEvent::TemplateChanged {
                template: template.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(selected)
    }

    /// Fetch the collection list and select the preferred one, else the first
    pub async fn resolve_collections(&self, ignore_preset: bool) -> Result<Option<String>> {
        self.set_phase(NavPhase::CollectionResolving);

        let collections = match self.backend.fetch_collections().await {
            Ok(collections) => collections,
            Err(e) => return Err(self.fail(e)),
        };

        let preset = if ignore_preset {
            None
        } else {
            self.lock().preferred_collection.clone()
        };
        let selected = pick(&collections, preset.as_deref());

        self.state.send_modify(|s| {
            s.collections = collections;
            s.active_collection = selected.clone();
            s.phase = s.settled_phase();
        });

        debug!(collection = ?selected, "Collection selected");
        Ok(selected)
    }

    /// Switch template and rebuild; unchanged selection is a no-op
    pub async fn select_template(&self, template: &str) -> Result<Option<usize>> {
        let changed = {
            let state = self.state.borrow();
            if !state.templates.iter().any(|t| t == template) {
                return Err(Error::Validation(format!("Unknown template '{}'", template)));
            }
            state.active_template.as_deref() != Some(template)
        };
        if !changed {
            return Ok(None);
        }

        self.lock().preferred_template = Some(template.to_string());
        self.state
            .send_modify(|s| s.active_template = Some(template.to_string()));
        self.events.emit_lossy(LmioEvent::TemplateChanged {
            template: template.to_string(),
            timestamp: Utc::now(),
        });

        self.reload().await
    }

    /// Switch collection and rebuild; unchanged selection is a no-op
    pub async fn select_collection(&self, collection: &str) -> Result<Option<usize>> {
        if self.state.borrow().active_collection.as_deref() == Some(collection) {
            return Ok(None);
        }

        self.lock().preferred_collection = Some(collection.to_string());
        self.state.send_modify(|s| {
            if !s.collections.iter().any(|c| c == collection) {
                s.collections.push(collection.to_string());
            }
            s.active_collection = Some(collection.to_string());
        });

        self.reload().await
    }

    /// Switch mode and rebuild; unchanged mode is a no-op
    pub async fn set_mode(&self, mode: Mode) -> Result<Option<usize>> {
        if self.state.borrow().mode == mode {
            return Ok(None);
        }

        self.state.send_modify(|s| s.mode = mode);
        self.reload().await
    }

    /// Rebuild the catalog of the active collection and open an asset in it
    ///
    /// Without an active collection or template there is nothing to load and
    /// this returns `Ok(None)`. Returns the index being opened otherwise.
    pub async fn reload(&self) -> Result<Option<usize>> {
        let (collection, template, mode, previous) = {
            let state = self.state.borrow();
            (
                state.active_collection.clone(),
                state.active_template.clone(),
                state.mode,
                state.current.as_ref().map(|c| (c.asset_id.clone(), c.index)),
            )
        };

        let Some(collection) = collection else {
            debug!("Reload with no active collection, doing nothing");
            return Ok(None);
        };
        if template.is_none() {
            debug!("Reload with no active template, doing nothing");
            return Ok(None);
        }

        info!(collection = %collection, mode = %mode, "Reloading asset catalog");

        // Switches still loading belong to the catalog being replaced
        self.bump_generation();
        let catalog = {
            let mut inner = self.lock();
            let catalog = self.catalog_generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.rebuilding = Some(catalog);
            if let Some(handle) = inner.in_flight.take() {
                handle.abort();
            }
            catalog
        };
        self.set_phase(NavPhase::CatalogLoading);

        let installed = self
            .install_catalog(&collection, mode, previous, catalog)
            .await;

        {
            let mut inner = self.lock();
            if inner.rebuilding == Some(catalog) {
                inner.rebuilding = None;
            }
        }

        match installed {
            Ok(Some(index)) => {
                self.switch_to(index, true, catalog).await?;
                Ok(Some(index))
            }
            other => other,
        }
    }

    /// Fetch the collection and make it the navigator's catalog
    ///
    /// `Ok(None)` when a later rebuild overtook this one; nothing is installed then.
    async fn install_catalog(
        &self,
        collection: &str,
        mode: Mode,
        previous: Option<(String, usize)>,
        catalog: u64,
    ) -> Result<Option<usize>> {
        let ids = match self.backend.fetch_collection(collection, mode).await {
            Ok(ids) => ids,
            Err(e) if self.is_stale_catalog(catalog) => {
                debug!(collection = %collection, error = %e, "Superseded catalog listing failed");
                return Ok(None);
            }
            Err(e) => {
                // Backend kept its session, so the published asset still matches it
                self.lock().published_catalog = catalog;
                return Err(self.fail(e));
            }
        };

        if self.is_stale_catalog(catalog) {
            debug!(collection = %collection, "Catalog superseded by a newer selection");
            return Ok(None);
        }

        let mut source = AssetSource::new(collection, mode, ids);

        let index = {
            let inner = self.lock();
            let same_collection = inner
                .source
                .as_ref()
                .is_some_and(|s| s.collection() == collection);

            match previous {
                Some((asset_id, old_index)) if same_collection => source
                    .asset_index(&asset_id)
                    .or_else(|| (old_index < source.len()).then_some(old_index))
                    .unwrap_or(0),
                None => inner.initial_index.unwrap_or(0),
                Some(_) => 0,
            }
        };

        if let Err(e) = source.set_index(index) {
            return Err(self.fail(e));
        }

        let asset_count = source.len();
        {
            let mut inner = self.lock();
            if self.is_stale_catalog(catalog) {
                return Ok(None);
            }
            inner.source = Some(source);
            inner.logs.clear();
        }

        self.events.emit_lossy(LmioEvent::CatalogRebuilt {
            collection: collection.to_string(),
            mode: mode.to_string(),
            asset_count,
            timestamp: Utc::now(),
        });

        Ok(Some(index))
    }

    /// Open the next asset; `Ok(false)` at the last one or while a catalog is loading
    pub async fn next(&self) -> Result<bool> {
        let target = {
            let inner = self.lock();
            inner
                .settled_source()
                .filter(|s| s.has_successor())
                .and_then(|s| s.index())
                .map(|i| i + 1)
        };

        match target {
            Some(index) => self.leave_to(index).await,
            None => Ok(false),
        }
    }

    /// Open the previous asset; `Ok(false)` at the first one or while a catalog is loading
    pub async fn previous(&self) -> Result<bool> {
        let target = {
            let inner = self.lock();
            inner
                .settled_source()
                .filter(|s| s.has_predecessor())
                .and_then(|s| s.index())
                .map(|i| i - 1)
        };

        match target {
            Some(index) => self.leave_to(index).await,
            None => Ok(false),
        }
    }

    /// Open the asset at `index`; out of range is a state error
    ///
    /// `Ok(false)` while a catalog is loading.
    pub async fn go_to(&self, index: usize) -> Result<bool> {
        {
            let inner = self.lock();
            if inner.rebuilding.is_some() {
                debug!(index, "Catalog loading, ignoring go_to");
                return Ok(false);
            }
            let source = inner
                .source
                .as_ref()
                .ok_or_else(|| Error::State("No asset catalog loaded".to_string()))?;
            source.check_index(index)?;
        }

        self.leave_to(index).await
    }

    /// Leave the current asset, guarding unsaved landmarks
    ///
    /// With auto-save on the landmarks are saved first and the switch goes
    /// ahead even if saving failed. Otherwise the user is asked; declining
    /// leaves everything as it was.
    async fn leave_to(&self, index: usize) -> Result<bool> {
        let catalog = self.catalog_generation.load(Ordering::SeqCst);
        let (unsaved, auto_save) = {
            let state = self.state.borrow();
            (state.has_unsaved_changes(), state.auto_save)
        };

        let mut discard = false;
        if unsaved {
            if auto_save {
                if let Err(e) = self.save_landmarks().await {
                    warn!(error = %e, "Auto-save failed, leaving asset anyway");
                }
            } else if self.confirm.confirm(UNSAVED_CHANGES_PROMPT).await {
                discard = true;
            } else {
                debug!("Navigation cancelled, keeping unsaved landmarks");
                return Ok(false);
            }
        }

        self.switch_to(index, discard, catalog).await
    }

    /// Load asset and landmarks for `index` and publish them together
    ///
    /// Returns `Ok(false)` when a newer switch started meanwhile and this one
    /// was dropped, or when `catalog` is no longer the navigator's catalog.
    /// `discard_previous` forgets the edit history of the asset being left.
    async fn switch_to(
        &self,
        index: usize,
        discard_previous: bool,
        catalog: u64,
    ) -> Result<bool> {
        let (generation, asset_id, mode, stored_log) = {
            let mut inner = self.lock();
            if inner.rebuilding.is_some() || self.is_stale_catalog(catalog) {
                debug!(index, catalog, "Catalog changed, dropping asset switch");
                return Ok(false);
            }
            let generation = self.bump_generation();

            if let Some(handle) = inner.in_flight.take() {
                handle.abort();
            }

            let source = inner
                .source
                .as_mut()
                .ok_or_else(|| Error::State("No asset catalog loaded".to_string()))?;
            source.set_index(index)?;

            let asset_id = source
                .id_at(index)
                .map(str::to_string)
                .ok_or_else(|| Error::State(format!("No asset at index {}", index)))?;
            let mode = source.mode();
            let stored_log = inner.logs.get(&asset_id).cloned();
            (generation, asset_id, mode, stored_log)
        };

        let (template, current_log) = {
            let state = self.state.borrow();
            let current_log = state
                .current
                .as_ref()
                .filter(|c| !discard_previous && c.asset_id == asset_id)
                .map(|c| c.landmarks.log().clone());
            (state.active_template.clone(), current_log)
        };
        let template =
            template.ok_or_else(|| Error::State("No active template".to_string()))?;
        let log = current_log.or(stored_log);

        debug!(index, asset = %asset_id, generation, "Switching asset");
        self.set_phase(NavPhase::AssetSwitching);

        let loading = load_asset(Arc::clone(&self.backend), mode, &asset_id);
        self.lock().in_flight = loading.abort_handle();

        let (payload, landmarks) = tokio::join!(loading, self.fetch_landmarks(&asset_id, &template));

        if self.is_stale(generation) {
            return Ok(self.discard_switch(index, generation));
        }

        let (payload, json) = match payload.and_then(|p| landmarks.map(|l| (p, l))) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.revert_cursor();
                return Err(self.fail(e));
            }
        };

        let landmarks = LandmarkGroup::parse(json, &asset_id, &template, log);
        let asset_count = {
            let mut inner = self.lock();
            inner.in_flight = None;
            inner.source.as_ref().map_or(0, AssetSource::len)
        };

        let mut previous = None;
        let published = self.state.send_if_modified(|s| {
            if self.is_stale(generation) {
                return false;
            }
            previous = s.current.replace(CurrentAsset {
                asset_id: asset_id.clone(),
                index,
                payload,
                landmarks,
            });
            s.asset_index = Some(index);
            s.asset_count = asset_count;
            s.generation = generation;
            s.phase = NavPhase::Ready;
            s.last_error = None;
            true
        });

        if !published {
            return Ok(self.discard_switch(index, generation));
        }

        {
            let mut inner = self.lock();
            inner.published_catalog = catalog;
            if let Some(previous) = previous.filter(|p| p.asset_id != asset_id) {
                if discard_previous {
                    inner.logs.remove(&previous.asset_id);
                } else {
                    inner
                        .logs
                        .insert(previous.asset_id.clone(), previous.landmarks.into_log());
                }
            }
        }

        info!(index, asset = %asset_id, template = %template, "Asset ready");
        self.events.emit_lossy(LmioEvent::AssetPublished {
            asset_id,
            asset_index: index,
            template,
            generation,
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    fn discard_switch(&self, index: usize, generation: u64) -> bool {
        debug!(index, generation, "Dropping superseded asset switch");
        self.events.emit_lossy(LmioEvent::SwitchDiscarded {
            asset_index: index,
            generation,
            timestamp: Utc::now(),
        });
        false
    }

    /// Landmarks of an asset, or the template's empty payload when they can't be read
    async fn fetch_landmarks(&self, asset_id: &str, template: &str) -> Result<Value> {
        match self.backend.fetch_landmark_group(asset_id, template).await {
            Ok(json) => Ok(json),
            Err(e) => {
                warn!(asset = %asset_id, error = %e, "Landmark fetch failed, using empty group");
                self.backend.empty_landmark_group(template)
            }
        }
    }

    /// Write the current landmarks to the backend; not retried on failure
    pub async fn save_landmarks(&self) -> Result<()> {
        if self.lock().published_catalog != self.catalog_generation.load(Ordering::SeqCst) {
            return Err(Error::State(
                "Asset catalog is being replaced; landmarks not saved".to_string(),
            ));
        }

        let (asset_id, template, payload) = {
            let state = self.state.borrow();
            let current = state
                .current
                .as_ref()
                .ok_or_else(|| Error::State("No landmarks to save".to_string()))?;
            (
                current.asset_id.clone(),
                current.landmarks.template.clone(),
                current.landmarks.payload().clone(),
            )
        };

        self.backend
            .save_landmark_group(&asset_id, &template, &payload)
            .await?;

        // Only mark saved if nothing was edited while the write was in flight
        self.state.send_if_modified(|s| match s.current.as_mut() {
            Some(c) if c.asset_id == asset_id && *c.landmarks.payload() == payload => {
                c.landmarks.log_mut().mark_saved();
                true
            }
            _ => false,
        });
        if let Some(log) = self.lock().logs.get_mut(&asset_id) {
            if *log.current() == payload {
                log.mark_saved();
            }
        }

        self.events.emit_lossy(LmioEvent::LandmarksSaved {
            asset_id,
            template,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a new landmark payload for the current asset
    pub fn edit_landmarks(&self, payload: Value) -> Result<()> {
        let mut applied = false;
        self.state.send_if_modified(|s| match s.current.as_mut() {
            Some(current) => {
                current.landmarks.log_mut().record(payload);
                applied = true;
                true
            }
            None => false,
        });

        if applied {
            Ok(())
        } else {
            Err(Error::State("No current asset to edit".to_string()))
        }
    }

    pub fn undo(&self) -> bool {
        self.state.send_if_modified(|s| {
            s.current
                .as_mut()
                .is_some_and(|c| c.landmarks.log_mut().undo())
        })
    }

    pub fn redo(&self) -> bool {
        self.state.send_if_modified(|s| {
            s.current
                .as_mut()
                .is_some_and(|c| c.landmarks.log_mut().redo())
        })
    }

    /// Replace the current landmarks with those stored for the previous asset
    ///
    /// The result lands in the current edit history as an unsaved edit.
    /// `Ok(false)` at the first asset, or when navigation moved on meanwhile.
    pub async fn reload_from_predecessor(&self) -> Result<bool> {
        let generation = self.generation.load(Ordering::SeqCst);

        let (asset_id, index, template) = {
            let state = self.state.borrow();
            let current = state
                .current
                .as_ref()
                .ok_or_else(|| Error::State("No current asset".to_string()))?;
            (
                current.asset_id.clone(),
                current.index,
                current.landmarks.template.clone(),
            )
        };

        if index == 0 {
            return Ok(false);
        }

        let predecessor = self
            .lock()
            .source
            .as_ref()
            .and_then(|s| s.id_at(index - 1))
            .map(str::to_string)
            .ok_or_else(|| Error::State(format!("No asset at index {}", index - 1)))?;

        let json = self.fetch_landmarks(&predecessor, &template).await?;

        let applied = self.state.send_if_modified(|s| {
            if self.is_stale(generation) {
                return false;
            }
            match s.current.as_mut() {
                Some(c) if c.asset_id == asset_id => {
                    let log = c.landmarks.log().clone();
                    c.landmarks = LandmarkGroup::parse(json, &asset_id, &template, Some(log));
                    true
                }
                _ => false,
            }
        });

        if applied {
            info!(asset = %asset_id, from = %predecessor, "Landmarks reloaded from previous asset");
        }
        Ok(applied)
    }

    pub fn set_auto_save(&self, on: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.auto_save != on;
            s.auto_save = on;
            changed
        });
    }

    /// Flip auto-save, returning the new setting
    pub fn toggle_auto_save(&self) -> bool {
        let mut now = false;
        self.state.send_modify(|s| {
            s.auto_save = !s.auto_save;
            now = s.auto_save;
        });
        now
    }

    pub fn is_auto_save_on(&self) -> bool {
        self.state.borrow().auto_save
    }

    fn set_phase(&self, phase: NavPhase) {
        self.state.send_if_modified(|s| {
            let changed = s.phase != phase;
            s.phase = phase;
            changed
        });
    }

    /// Report a failed transition, keeping the last published asset
    fn fail(&self, error: Error) -> Error {
        warn!(error = %error, "Navigation failed");
        self.state.send_modify(|s| {
            s.phase = s.settled_phase();
            s.last_error = Some(error.to_string());
        });
        self.events.emit_lossy(LmioEvent::NavigationFailed {
            message: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }

    /// Point the cursor back at the published asset after a failed switch
    fn revert_cursor(&self) {
        let published = self.state.borrow().current_asset_id().map(str::to_string);
        let mut inner = self.lock();
        inner.in_flight = None;
        if let Some(source) = inner.source.as_mut() {
            let index = published.and_then(|id| source.asset_index(&id));
            source.restore_index(index);
        }
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn is_stale_catalog(&self, catalog: u64) -> bool {
        self.catalog_generation.load(Ordering::SeqCst) != catalog
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The preset when it is on offer, otherwise the first item
fn pick(items: &[String], preset: Option<&str>) -> Option<String> {
    preset
        .and_then(|p| items.iter().find(|item| item.as_str() == p))
        .or_else(|| items.first())
        .cloned()
}
