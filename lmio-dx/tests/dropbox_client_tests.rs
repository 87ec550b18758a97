//! Integration tests for the Dropbox backend client over an in-memory transport

mod helpers;

use chrono::{Duration, Utc};
use helpers::memory_transport::{
    file_url, media_url, metadata_url, png_bytes, put_url, MemoryTransport,
};
use lmio_common::config::BackendConfig;
use lmio_common::preferences::keys;
use lmio_common::{Error, Preferences};
use lmio_dx::backend::{Backend, DropboxBackend, ListOptions, SlotState};
use lmio_dx::template::Template;
use lmio_dx::Mode;
use serde_json::json;
use std::sync::Arc;

const FACE_TEMPLATE: &str = "face:\n  points: 3\n  connectivity:\n    - \"0:2\"\n";

fn backend(transport: &Arc<MemoryTransport>) -> DropboxBackend {
    DropboxBackend::new(
        transport.clone(),
        &BackendConfig::default(),
        Preferences::in_memory(),
    )
}

async fn backend_with_template(transport: &Arc<MemoryTransport>) -> DropboxBackend {
    transport.file("/templates/ibug_face.yml", FACE_TEMPLATE);
    let backend = backend(transport);
    backend
        .set_template("/templates/ibug_face.yml", None)
        .await
        .unwrap();
    backend
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_listing_filters_hidden_dirs_and_extensions() {
    let transport = MemoryTransport::new();
    transport.directory(
        "/",
        &[
            ("/a.jpg", false),
            ("/a.png", false),
            ("/.hidden.jpg", false),
            ("/sub", true),
        ],
    );
    let backend = backend(&transport);

    let entries = backend
        .list("/", &ListOptions::files_with(&["jpg"]))
        .await
        .unwrap();

    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/a.jpg"]);
}

#[tokio::test]
async fn test_listing_cache_and_bypass() {
    let transport = MemoryTransport::new();
    transport.directory("/faces", &[("/faces/a.jpg", false)]);
    let backend = backend(&transport);

    backend.list("/faces", &ListOptions::default()).await.unwrap();
    backend.list("/faces", &ListOptions::folders()).await.unwrap();
    assert_eq!(transport.calls_to(&metadata_url("/faces")), 1);

    backend
        .list("/faces", &ListOptions::default().bypass_cache())
        .await
        .unwrap();
    assert_eq!(transport.calls_to(&metadata_url("/faces")), 2);

    backend.invalidate("/faces");
    backend.list("/faces", &ListOptions::default()).await.unwrap();
    assert_eq!(transport.calls_to(&metadata_url("/faces")), 3);
}

#[tokio::test]
async fn test_listing_a_file_is_validation_error() {
    let transport = MemoryTransport::new();
    transport.file_metadata("/notes.txt");
    let backend = backend(&transport);

    let result = backend.list("/notes.txt", &ListOptions::default()).await;
    assert!(matches!(result, Err(Error::Validation(msg)) if msg.contains("is not a directory")));
}

#[tokio::test]
async fn test_failed_listing_is_not_cached() {
    let transport = MemoryTransport::new();
    let backend = backend(&transport);

    let result = backend.list("/missing", &ListOptions::default()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(backend.listing_cache().state("/missing").is_none());

    transport.directory("/missing", &[]);
    assert!(backend.list("/missing", &ListOptions::default()).await.is_ok());
}

#[tokio::test]
async fn test_find_templates_walks_tree() {
    let transport = MemoryTransport::new();
    transport.directory(
        "/t",
        &[("/t/face.yml", false), ("/t/readme.md", false), ("/t/more", true)],
    );
    transport.directory("/t/more", &[("/t/more/ear.json", false), ("/t/more/.x.yml", false)]);
    let backend = backend(&transport);

    let found = backend.find_templates("/t").await.unwrap();
    assert_eq!(found, vec!["/t/face.yml", "/t/more/ear.json"]);
}

// ============================================================================
// Media URLs
// ============================================================================

#[tokio::test]
async fn test_media_url_cached_within_ttl() {
    let transport = MemoryTransport::new();
    let expires = Utc::now() + Duration::hours(4);
    transport.media("/a.jpg", "https://dl.example/a1", expires, Vec::new());
    let backend = backend(&transport);

    let first = backend.media_url("/a.jpg", false).await.unwrap();
    let second = backend.media_url("/a.jpg", false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.url, "https://dl.example/a1");
    assert_eq!(transport.calls_to(&media_url("/a.jpg")), 1);
    assert!(matches!(
        backend.media_cache().state("/a.jpg"),
        Some(SlotState::Ready { expires: Some(_) })
    ));
}

#[tokio::test]
async fn test_expired_media_url_is_refreshed() {
    let transport = MemoryTransport::new();
    transport.media(
        "/a.jpg",
        "https://dl.example/old",
        Utc::now() - Duration::minutes(1),
        Vec::new(),
    );
    let backend = backend(&transport);

    let first = backend.media_url("/a.jpg", false).await.unwrap();
    assert_eq!(first.url, "https://dl.example/old");

    transport.media(
        "/a.jpg",
        "https://dl.example/new",
        Utc::now() + Duration::hours(4),
        Vec::new(),
    );
    let second = backend.media_url("/a.jpg", false).await.unwrap();

    assert_eq!(second.url, "https://dl.example/new");
    assert_eq!(transport.calls_to(&media_url("/a.jpg")), 2);
}

#[tokio::test]
async fn test_media_url_bypass_and_concurrent_share() {
    let transport = MemoryTransport::new();
    transport.media(
        "/a.jpg",
        "https://dl.example/a",
        Utc::now() + Duration::hours(4),
        Vec::new(),
    );
    let backend = backend(&transport);

    let (a, b) = tokio::join!(
        backend.media_url("/a.jpg", false),
        backend.media_url("/a.jpg", true)
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls_to(&media_url("/a.jpg")), 1);

    backend.media_url("/a.jpg", true).await.unwrap();
    assert_eq!(transport.calls_to(&media_url("/a.jpg")), 2);
}

// ============================================================================
// Images and geometry
// ============================================================================

#[tokio::test]
async fn test_concurrent_image_fetches_share_one_decode() {
    let transport = MemoryTransport::new();
    transport.media(
        "/faces/a.png",
        "https://dl.example/a.png",
        Utc::now() + Duration::hours(4),
        png_bytes(4, 3),
    );
    let backend = backend(&transport);

    let (a, b, c) = tokio::join!(
        backend.fetch_img("/faces/a.png"),
        backend.fetch_img("/faces/a.png"),
        backend.fetch_img("/faces/a.png")
    );

    let a = a.unwrap();
    assert_eq!((a.width, a.height), (4, 3));
    assert!(Arc::ptr_eq(&a.pixels, &b.unwrap().pixels));
    assert!(Arc::ptr_eq(&a.pixels, &c.unwrap().pixels));
    assert_eq!(transport.calls_to("https://dl.example/a.png"), 1);

    // Entry is dropped once settled: a later fetch decodes again
    assert!(backend.image_cache().is_empty());
    backend.fetch_img("/faces/a.png").await.unwrap();
    assert_eq!(transport.calls_to("https://dl.example/a.png"), 2);
}

#[tokio::test]
async fn test_concurrent_image_failure_is_shared() {
    let transport = MemoryTransport::new();
    transport.media(
        "/faces/bad.png",
        "https://dl.example/bad.png",
        Utc::now() + Duration::hours(4),
        b"not a png".to_vec(),
    );
    let backend = backend(&transport);

    let (a, b) = tokio::join!(
        backend.fetch_img("/faces/bad.png"),
        backend.fetch_img("/faces/bad.png")
    );

    assert!(matches!(a, Err(Error::Parse(_))));
    assert_eq!(a, b);
    assert_eq!(transport.calls_to("https://dl.example/bad.png"), 1);
    assert!(backend.image_cache().is_empty());
}

#[tokio::test]
async fn test_mesh_catalog_and_texture_lookup() {
    let transport = MemoryTransport::new();
    transport.directory(
        "/m",
        &[
            ("/m/m.obj", false),
            ("/m/m.png", false),
            ("/m/m.mtl", false),
            ("/m/n.stl", false),
            ("/m/notes.txt", false),
        ],
    );
    transport.media(
        "/m/m.png",
        "https://dl.example/m.png",
        Utc::now() + Duration::hours(4),
        png_bytes(2, 2),
    );
    let backend = backend(&transport);

    let ids = backend.fetch_collection("/m", Mode::Mesh).await.unwrap();
    assert_eq!(ids, vec!["m.obj", "n.stl"]);

    let catalog = backend.catalog();
    assert_eq!(catalog.texture_for("/m/m.obj"), Some("/m/m.png"));
    assert_eq!(catalog.material_for("/m/m.obj"), Some("/m/m.mtl"));
    assert_eq!(catalog.texture_for("/m/n.stl"), None);
    assert_eq!(catalog.material_for("/m/n.stl"), None);

    let texture = backend.fetch_texture("m.obj").await.unwrap();
    assert_eq!(texture.source, "/m/m.png");
    assert!(matches!(
        backend.fetch_texture("n.stl").await,
        Err(Error::NotFound(msg)) if msg.contains("No texture")
    ));

    assert_eq!(backend.fetch_collections().await.unwrap(), vec!["/m"]);
    assert_eq!(
        backend.preferences().get_str(keys::DROPBOX_ASSETS_PATH).as_deref(),
        Some("/m")
    );
}

#[tokio::test]
async fn test_catalog_listing_bypasses_cache() {
    let transport = MemoryTransport::new();
    transport.directory("/faces", &[("/faces/a.jpg", false)]);
    let backend = backend(&transport);

    backend.fetch_collection("/faces", Mode::Image).await.unwrap();
    transport.directory("/faces", &[("/faces/a.jpg", false), ("/faces/b.jpg", false)]);
    let ids = backend.fetch_collection("/faces", Mode::Image).await.unwrap();

    assert_eq!(ids, vec!["a.jpg", "b.jpg"]);
    assert_eq!(transport.calls_to(&metadata_url("/faces")), 2);
}

#[tokio::test]
async fn test_geometry_dispatch_by_extension() {
    let transport = MemoryTransport::new();
    transport.directory(
        "/m",
        &[("/m/tri.obj", false), ("/m/tri.stl", false), ("/m/tri.ply", false)],
    );
    transport.file("/m/tri.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
    transport.media(
        "/m/tri.stl",
        "https://dl.example/tri.stl",
        Utc::now() + Duration::hours(4),
        "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid t\n",
    );
    let backend = backend(&transport);
    backend.fetch_collection("/m", Mode::Mesh).await.unwrap();

    let obj = backend.fetch_geometry("tri.obj").await.unwrap();
    assert_eq!(obj.triangle_count(), 1);
    assert_eq!(transport.calls_to(&file_url("/m/tri.obj")), 1);

    let stl = backend.fetch_geometry("tri.stl").await.unwrap();
    assert_eq!(stl.triangle_count(), 1);
    assert_eq!(transport.calls_to(&media_url("/m/tri.stl")), 1);

    assert!(matches!(
        backend.fetch_geometry("tri.ply").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_aborted_geometry_download() {
    let transport = MemoryTransport::new();
    transport.directory("/m", &[("/m/big.obj", false)]);
    transport.file("/m/big.obj", "v 0 0 0\n");
    let backend = backend(&transport);
    backend.fetch_collection("/m", Mode::Mesh).await.unwrap();

    let download = backend.fetch_geometry("big.obj");
    let handle = download.handle();
    handle.abort();

    assert!(matches!(download.await, Err(Error::Aborted(_))));
    handle.abort();
}

#[tokio::test]
async fn test_thumbnails_unsupported() {
    let transport = MemoryTransport::new();
    let backend = backend(&transport);
    assert!(backend.fetch_thumbnail("a.jpg").await.is_err());
    assert_eq!(transport.call_count(), 0);
}

// ============================================================================
// Templates and landmarks
// ============================================================================

#[tokio::test]
async fn test_set_template_downloads_parses_and_persists() {
    let transport = MemoryTransport::new();
    let backend = backend_with_template(&transport).await;

    assert_eq!(backend.fetch_templates().await.unwrap(), vec!["face"]);
    let template = backend.template("face").unwrap();
    assert_eq!(template.point_count(), 3);

    let prefs = backend.preferences();
    assert_eq!(
        prefs.get_str(keys::DROPBOX_TEMPLATE_PATH).as_deref(),
        Some("/templates/ibug_face.yml")
    );
    let stored = prefs.get(keys::DROPBOX_TEMPLATE_CONTENT).unwrap();
    assert_eq!(Template::from_json(&stored).unwrap(), template);
}

#[tokio::test]
async fn test_unsupported_template_extension_keeps_previous() {
    let transport = MemoryTransport::new();
    let backend = backend_with_template(&transport).await;
    let calls_before = transport.call_count();

    let result = backend.set_template("/t.xml", None).await;

    assert!(matches!(result, Err(Error::Validation(msg)) if msg.contains("xml")));
    assert_eq!(transport.call_count(), calls_before);
    assert_eq!(backend.fetch_templates().await.unwrap(), vec!["face"]);
    assert_eq!(
        backend.template_path().as_deref(),
        Some("/templates/ibug_face.yml")
    );
}

#[tokio::test]
async fn test_inline_template_skips_download() {
    let transport = MemoryTransport::new();
    let backend = backend(&transport);

    let name = backend
        .set_template(
            "/t/study_ear.json",
            Some(json!({"groups": [{"label": "ear", "points": 2}]})),
        )
        .await
        .unwrap();

    assert_eq!(name, "ear");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_unpersisted_template_is_not_installed() {
    let transport = MemoryTransport::new();
    // A regular file where the preferences directory should be
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let prefs = Preferences::load(&blocker.path().join("prefs.json")).unwrap();
    let backend = DropboxBackend::new(transport.clone(), &BackendConfig::default(), prefs);

    let result = backend
        .set_template(
            "/t/study_ear.json",
            Some(json!({"groups": [{"label": "ear", "points": 2}]})),
        )
        .await;

    assert!(matches!(result, Err(Error::Io(_))));
    assert!(backend.template("ear").is_none());
    assert!(backend.template_path().is_none());
    assert!(backend.fetch_templates().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overtaken_catalog_rebuild_installs_nothing() {
    let transport = MemoryTransport::new();
    transport.directory("/a", &[("/a/a1.jpg", false)]);
    transport.directory("/b", &[("/b/b1.jpg", false)]);
    let backend = backend_with_template(&transport).await;

    transport.gate(&metadata_url("/a"));
    let slow = tokio::spawn({
        let backend = backend.clone();
        async move { backend.fetch_collection("/a", Mode::Image).await }
    });
    while transport.calls_to(&metadata_url("/a")) == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        backend.fetch_collection("/b", Mode::Image).await.unwrap(),
        vec!["b1.jpg"]
    );
    transport.open(&metadata_url("/a"));

    assert!(matches!(slow.await.unwrap(), Err(Error::Aborted(_))));
    assert_eq!(backend.assets_path().as_deref(), Some("/b"));
    assert_eq!(
        backend.preferences().get_str(keys::DROPBOX_ASSETS_PATH).as_deref(),
        Some("/b")
    );

    backend
        .save_landmark_group("b1.jpg", "face", &json!({"saved": true}))
        .await
        .unwrap();
    assert_eq!(transport.puts()[0].0, put_url("/b/landmarks/b1.jpg_face.ljson"));
}

#[tokio::test]
async fn test_missing_landmarks_fall_back_to_empty_group() {
    let transport = MemoryTransport::new();
    transport.directory("/faces", &[("/faces/a.jpg", false)]);
    let backend = backend_with_template(&transport).await;
    backend.fetch_collection("/faces", Mode::Image).await.unwrap();

    let payload = backend.fetch_landmark_group("a.jpg", "face").await.unwrap();

    assert_eq!(payload, backend.template("face").unwrap().empty_ljson(2));
    assert_eq!(
        payload["groups"][0]["landmarks"][0]["point"],
        json!([null, null])
    );
    assert_eq!(
        transport.calls_to(&file_url("/faces/landmarks/a.jpg_face.ljson")),
        1
    );
}

#[tokio::test]
async fn test_stored_landmarks_and_save_path() {
    let transport = MemoryTransport::new();
    transport.directory("/m", &[("/m/a.obj", false)]);
    transport.file(
        "/m/landmarks/a.obj_face.ljson",
        r#"{"version": 2, "groups": []}"#,
    );
    let backend = backend_with_template(&transport).await;
    backend.fetch_collection("/m", Mode::Mesh).await.unwrap();

    let payload = backend.fetch_landmark_group("a.obj", "face").await.unwrap();
    assert_eq!(payload, json!({"version": 2, "groups": []}));

    let empty = backend.empty_landmark_group("face").unwrap();
    assert_eq!(
        empty["groups"][0]["landmarks"][0]["point"],
        json!([null, null, null])
    );

    backend
        .save_landmark_group("a.obj", "face", &json!({"saved": true}))
        .await
        .unwrap();
    assert_eq!(
        transport.puts(),
        vec![(put_url("/m/landmarks/a.obj_face.ljson"), json!({"saved": true}))]
    );
}

// ============================================================================
// Mode and session restore
// ============================================================================

#[tokio::test]
async fn test_unknown_mode_keeps_current() {
    let transport = MemoryTransport::new();
    let backend = backend(&transport);

    assert_eq!(backend.set_mode("mesh").unwrap(), Mode::Mesh);
    assert_eq!(backend.set_mode("volume").unwrap(), Mode::Mesh);
    assert_eq!(backend.fetch_mode().await.unwrap(), Mode::Mesh);
    assert_eq!(
        backend.preferences().get_str(keys::DROPBOX_MODE).as_deref(),
        Some("mesh")
    );
}

#[tokio::test]
async fn test_restore_from_preferences() {
    let transport = MemoryTransport::new();
    let first = backend_with_template(&transport).await;
    transport.directory("/m", &[("/m/a.obj", false)]);
    first.fetch_collection("/m", Mode::Mesh).await.unwrap();

    let restored = DropboxBackend::new(
        transport.clone(),
        &BackendConfig::default(),
        first.preferences().clone(),
    );
    let calls_before = transport.call_count();
    restored.restore().unwrap();

    assert_eq!(transport.call_count(), calls_before);
    assert_eq!(restored.mode(), Mode::Mesh);
    assert_eq!(restored.assets_path().as_deref(), Some("/m"));
    assert_eq!(restored.fetch_templates().await.unwrap(), vec!["face"]);
    assert_eq!(restored.template("face"), first.template("face"));
}
