//! In-memory stand-in for the Dropbox HTTP API

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageBuffer, ImageFormat, Rgba};
use lmio_common::{Error, Result};
use lmio_dx::backend::Transport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const API: &str = "https://api.dropbox.com/1";
pub const CONTENT: &str = "https://api-content.dropbox.com/1";

/// Serves canned responses keyed by full URL and records every request
#[derive(Default)]
pub struct MemoryTransport {
    json: Mutex<HashMap<String, Value>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<Vec<(String, Value)>>,
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Metadata for a directory holding `(path, is_dir)` children
    pub fn directory(&self, path: &str, children: &[(&str, bool)]) {
        let contents: Vec<Value> = children
            .iter()
            .map(|(p, is_dir)| json!({ "path": p, "is_dir": is_dir }))
            .collect();
        self.json.lock().unwrap().insert(
            metadata_url(path),
            json!({ "path": path, "is_dir": true, "contents": contents }),
        );
    }

    /// Metadata for a plain file
    pub fn file_metadata(&self, path: &str) {
        self.json
            .lock()
            .unwrap()
            .insert(metadata_url(path), json!({ "path": path, "is_dir": false }));
    }

    /// Downloadable file content
    pub fn file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.bytes
            .lock()
            .unwrap()
            .insert(file_url(path), content.into());
    }

    /// Media link for `path` resolving to `url`, plus the bytes behind it
    pub fn media(&self, path: &str, url: &str, expires: DateTime<Utc>, content: impl Into<Vec<u8>>) {
        self.json.lock().unwrap().insert(
            media_url(path),
            json!({ "url": url, "expires": expires.to_rfc2822() }),
        );
        self.bytes
            .lock()
            .unwrap()
            .insert(url.to_string(), content.into());
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn puts(&self) -> Vec<(String, Value)> {
        self.puts.lock().unwrap().clone()
    }

    /// Hold JSON requests to `url` until [`MemoryTransport::open`]
    pub fn gate(&self, url: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn open(&self, url: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(url) {
            gate.add_permits(1);
        }
    }

    fn record(&self, url: &str) {
        self.calls.lock().unwrap().push(url.to_string());
    }
}

pub fn metadata_url(path: &str) -> String {
    format!("{}/metadata/auto{}", API, path)
}

pub fn media_url(path: &str) -> String {
    format!("{}/media/auto{}", API, path)
}

pub fn file_url(path: &str) -> String {
    format!("{}/files/auto{}", CONTENT, path)
}

pub fn put_url(path: &str) -> String {
    format!("{}/files_put/auto{}", CONTENT, path)
}

/// A small PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([200u8, 100, 50, 255]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_json(&self, url: &str, _query: &[(&str, &str)]) -> Result<Value> {
        self.record(url);
        let gate = self.gates.lock().unwrap().get(url).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        tokio::task::yield_now().await;
        let found = self.json.lock().unwrap().get(url).cloned();
        found.ok_or_else(|| Error::NotFound(url.to_string()))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.record(url);
        tokio::task::yield_now().await;
        let found = self.bytes.lock().unwrap().get(url).cloned();
        found.ok_or_else(|| Error::NotFound(url.to_string()))
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }

    async fn put_json(&self, url: &str, body: &Value) -> Result<()> {
        self.record(url);
        self.puts
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        Ok(())
    }
}
