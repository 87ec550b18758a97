//! Scriptable backend for navigator tests
//!
//! Every fetch is recorded as `"<kind>:<id>"`. A fetch whose key has been
//! gated waits until the gate is opened, so tests can decide which side of an
//! asset switch resolves first.

use async_trait::async_trait;
use lmio_common::{Error, Result};
use lmio_dx::backend::{Backend, Download};
use lmio_dx::geometry::Geometry;
use lmio_dx::texture::DecodedImage;
use lmio_dx::Mode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub struct FakeBackend {
    pub mode: Mutex<Mode>,
    pub templates: Mutex<Vec<String>>,
    pub collections: Mutex<Vec<String>>,
    pub catalogs: Mutex<HashMap<String, Vec<String>>>,
    /// Stored landmarks by asset id; missing ids fail with not-found
    pub landmarks: Mutex<HashMap<String, Value>>,
    pub saves: Mutex<Vec<(String, Value)>>,
    pub fail_saves: AtomicBool,
    pub fail_templates: AtomicBool,
    /// Collection the catalog was last built from, like a real backend session
    pub session: Mutex<Option<String>>,
    listings: AtomicU64,
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FakeBackend {
    /// One template `face`, one collection `/c` holding `0.jpg`..`{n-1}.jpg`
    pub fn with_assets(n: usize) -> Arc<Self> {
        let ids = (0..n).map(|i| format!("{}.jpg", i)).collect();
        Arc::new(Self {
            mode: Mutex::new(Mode::Image),
            templates: Mutex::new(vec!["face".to_string()]),
            collections: Mutex::new(vec!["/c".to_string()]),
            catalogs: Mutex::new(HashMap::from([("/c".to_string(), ids)])),
            landmarks: Mutex::new(HashMap::new()),
            saves: Mutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
            fail_templates: AtomicBool::new(false),
            session: Mutex::new(None),
            listings: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn store_landmarks(&self, asset_id: &str, payload: Value) {
        self.landmarks
            .lock()
            .unwrap()
            .insert(asset_id.to_string(), payload);
    }

    /// Hold fetches of `key` until [`FakeBackend::open`]
    pub fn gate(&self, key: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn open(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(key) {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, key: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == key)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn saves(&self) -> Vec<(String, Value)> {
        self.saves.lock().unwrap().clone()
    }

    pub fn session(&self) -> Option<String> {
        self.session.lock().unwrap().clone()
    }

    async fn pass(&self, key: String) {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

pub fn empty_payload(template: &str) -> Value {
    json!({ "empty": template })
}

fn image(id: &str) -> DecodedImage {
    DecodedImage {
        source: id.to_string(),
        width: 1,
        height: 1,
        pixels: Arc::new(vec![0, 0, 0, 255]),
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_mode(&self) -> Result<Mode> {
        Ok(*self.mode.lock().unwrap())
    }

    async fn fetch_templates(&self) -> Result<Vec<String>> {
        if self.fail_templates.load(Ordering::SeqCst) {
            return Err(Error::Network("templates unavailable".to_string()));
        }
        Ok(self.templates.lock().unwrap().clone())
    }

    async fn fetch_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.lock().unwrap().clone())
    }

    async fn fetch_collection(&self, collection: &str, mode: Mode) -> Result<Vec<String>> {
        let ticket = self.listings.fetch_add(1, Ordering::SeqCst) + 1;
        self.pass(format!("collection:{}", collection)).await;

        let ids = self.catalogs.lock().unwrap().get(collection).cloned();
        let ids = ids.ok_or_else(|| Error::NotFound(collection.to_string()))?;
        if self.listings.load(Ordering::SeqCst) != ticket {
            return Err(Error::Aborted(collection.to_string()));
        }
        *self.mode.lock().unwrap() = mode;
        *self.session.lock().unwrap() = Some(collection.to_string());
        Ok(ids)
    }

    async fn fetch_img(&self, path: &str) -> Result<DecodedImage> {
        self.pass(format!("img:{}", path)).await;
        Ok(image(path))
    }

    async fn fetch_texture(&self, asset_id: &str) -> Result<DecodedImage> {
        self.pass(format!("texture:{}", asset_id)).await;
        Ok(image(asset_id))
    }

    async fn fetch_thumbnail(&self, asset_id: &str) -> Result<DecodedImage> {
        Err(Error::Validation(format!("no thumbnail for {}", asset_id)))
    }

    fn fetch_geometry(&self, asset_id: &str) -> Download<Geometry> {
        let key = format!("geometry:{}", asset_id);
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();

        Download::new(asset_id.to_string(), async move {
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            Ok(Geometry::default())
        })
    }

    async fn fetch_landmark_group(&self, asset_id: &str, template: &str) -> Result<Value> {
        self.pass(format!("landmarks:{}", asset_id)).await;
        let stored = self.landmarks.lock().unwrap().get(asset_id).cloned();
        stored.ok_or_else(|| Error::NotFound(format!("{}_{}.ljson", asset_id, template)))
    }

    async fn save_landmark_group(
        &self,
        asset_id: &str,
        _template: &str,
        payload: &Value,
    ) -> Result<()> {
        self.pass(format!("save:{}", asset_id)).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Api(500, "write failed".to_string()));
        }
        self.saves
            .lock()
            .unwrap()
            .push((asset_id.to_string(), payload.clone()));
        Ok(())
    }

    fn empty_landmark_group(&self, template: &str) -> Result<Value> {
        Ok(empty_payload(template))
    }
}
