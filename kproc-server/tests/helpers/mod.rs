//! Shared test fixtures: temp-dir app state, multipart bodies, request
//! helpers
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use http_body_util::BodyExt;
use kproc_server::config::Config;
use kproc_server::gpu::{GpuStatus, StaticGpuProbe};
use kproc_server::{build_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const BOUNDARY: &str = "kproc-test-boundary";

/// App state rooted in a fresh temp directory
pub fn test_state(gpu_available: bool) -> (tempfile::TempDir, AppState) {
    test_state_with(gpu_available, |_| {})
}

/// Same, with a config tweak hook
pub fn test_state_with<F: FnOnce(&mut Config)>(
    gpu_available: bool,
    tweak: F,
) -> (tempfile::TempDir, AppState) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config {
        upload_dir: tmp.path().join("uploads"),
        output_dir: tmp.path().join("outputs"),
        ..Config::default()
    };
    tweak(&mut config);

    let status = if gpu_available {
        GpuStatus::available(vec!["Test GPU".to_string()])
    } else {
        GpuStatus::unavailable()
    };
    let state = AppState::new(config, Arc::new(StaticGpuProbe(status))).unwrap();
    (tmp, state)
}

/// Multipart body with one file field plus extra text fields
pub fn multipart_body(filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: audio/mpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn send(state: &AppState, request: Request<Body>) -> Response<Body> {
    build_router(state.clone()).oneshot(request).await.unwrap()
}

pub async fn get(state: &AppState, uri: &str) -> Response<Body> {
    send(
        state,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn upload_file(
    state: &AppState,
    filename: &str,
    bytes: &[u8],
    fields: &[(&str, &str)],
) -> Response<Body> {
    let body = multipart_body(filename, bytes, fields);
    send(
        state,
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

pub async fn post_json(state: &AppState, uri: &str, body: Value) -> Response<Body> {
    send(
        state,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn post_empty(state: &AppState, uri: &str) -> Response<Body> {
    send(
        state,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn delete(state: &AppState, uri: &str) -> Response<Body> {
    send(
        state,
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

/// Read a response body as JSON
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Upload a file and return its file_id, asserting success
pub async fn upload_ok(
    state: &AppState,
    filename: &str,
    fields: &[(&str, &str)],
) -> String {
    let response = upload_file(state, filename, b"fake-audio-bytes", fields).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["file_id"].as_str().unwrap().to_string()
}
