//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::Request,
    response::Response,
    Router,
};
use tempfile::TempDir;
use tts_core::mock::{MockBackend, MockConfig};
use tts_core::{InferenceBackend, TtsEngine};
use tts_server::config::ServerConfig;
use tts_server::{build_router, AppState};

pub const BOUNDARY: &str = "tts-test-boundary";

pub struct TestApp {
    pub app: Router,
    pub engine: Arc<TtsEngine<MockBackend>>,
    /// Uploads directory; removed when the app is dropped.
    pub uploads: TempDir,
}

/// Create a test app backed by the in-process mock backend
pub fn create_test_app() -> TestApp {
    create_test_app_with(MockConfig::default(), |_| {})
}

pub fn create_test_app_with(mock: MockConfig, tweak: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        uploads_dir: uploads.path().to_path_buf(),
        ..ServerConfig::default()
    };
    tweak(&mut config);

    let catalog = mock.catalog.clone();
    let backend = MockBackend::load(mock).unwrap();
    let engine = Arc::new(TtsEngine::with_backend(config.engine_config(catalog), backend));
    let app = build_router(AppState::new(Arc::clone(&engine), config)).unwrap();

    TestApp { app, engine, uploads }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Multipart body with a single `file` field.
pub fn post_upload(uri: &str, filename: &str, contents: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
