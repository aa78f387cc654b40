//! HTTP API integration tests
//!
//! Exercises the public surface through the full router: upload and
//! duplicate detection, stage triggering with skip-cache, GPU gating,
//! status aggregation, downloads, deletion, request-ID round-trips, and
//! CORS header discipline.

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use helpers::*;
use http_body_util::BodyExt;
use kproc_common::StageKind;
use serde_json::json;
use std::time::Duration;

// ----------------------------------------------------------------------
// Health & discovery
// ----------------------------------------------------------------------

#[tokio::test]
async fn health_reports_models_and_websocket_support() {
    let (_tmp, state) = test_state(true);
    let response = get(&state, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["websocket_support"], true);
    let models: Vec<&str> = body["available_models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap())
        .collect();
    assert!(models.contains(&"separation"));
    assert!(models.contains(&"karaoke"));
}

#[tokio::test]
async fn liveness_probe_is_trivial() {
    let (_tmp, state) = test_state(true);
    let body = body_json(get(&state, "/status").await).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn gpu_status_reflects_probe() {
    let (_tmp, state) = test_state(false);
    let body = body_json(get(&state, "/gpu-status").await).await;
    assert_eq!(body["available"], false);
    assert_eq!(body["gpu_count"], 0);

    let (_tmp, state) = test_state(true);
    let body = body_json(get(&state, "/gpu-status").await).await;
    assert_eq!(body["available"], true);
    assert_eq!(body["gpu_count"], 1);
}

#[tokio::test]
async fn models_endpoint_lists_variants_and_gpu_flags() {
    let (_tmp, state) = test_state(true);
    let body = body_json(get(&state, "/models").await).await;
    assert_eq!(body["separation"]["default"], "htdemucs");
    assert_eq!(body["separation"]["requires_gpu"], true);
    assert_eq!(body["karaoke"]["requires_gpu"], false);
    assert!(body["transcription"]["variants"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "base"));
}

// ----------------------------------------------------------------------
// Upload
// ----------------------------------------------------------------------

#[tokio::test]
async fn upload_parses_artist_and_title_from_filename() {
    let (_tmp, state) = test_state(true);
    let response = upload_file(
        &state,
        "Adele - Hello.mp3",
        b"fake-mp3-bytes",
        &[("auto_process", "false")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["title"], "Hello");
    assert_eq!(body["artist"], "Adele");
    assert_eq!(body["size"], 14);
    assert_eq!(body["status"], "completed");
    assert!(uuid::Uuid::parse_str(body["file_id"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn upload_form_fields_override_filename_heuristic() {
    let (_tmp, state) = test_state(true);
    let response = upload_file(
        &state,
        "track01.mp3",
        b"bytes",
        &[
            ("auto_process", "false"),
            ("title", "Real Title"),
            ("artist", "Real Artist"),
        ],
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["title"], "Real Title");
    assert_eq!(body["artist"], "Real Artist");
}

#[tokio::test]
async fn duplicate_upload_returns_conflict_with_existing_id() {
    let (_tmp, state) = test_state(true);
    let first = upload_ok(&state, "Song.mp3", &[("auto_process", "false")]).await;

    // Same normalized filename, different bytes: still a duplicate.
    let response = upload_file(
        &state,
        "Song.mp3",
        b"completely different bytes",
        &[("auto_process", "false")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Song already exists");
    assert_eq!(body["existing"], true);
    assert_eq!(body["file_id"].as_str().unwrap(), first);
    assert!(body["request_id"].is_string());

    // No second record was persisted.
    assert_eq!(state.store.iter_all_uploads().unwrap().len(), 1);
}

#[tokio::test]
async fn upload_rejects_disallowed_extension() {
    let (_tmp, state) = test_state(true);
    let response = upload_file(&state, "malware.exe", b"MZ", &[]).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert_eq!(body["code"], 415);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn upload_rejects_oversized_file() {
    let (_tmp, state) = test_state_with(true, |config| {
        config.max_upload_bytes = 16;
    });
    let response = upload_file(
        &state,
        "big.mp3",
        &[0u8; 64],
        &[("auto_process", "false")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["code"], 413);
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let (_tmp, state) = test_state(true);
    // A multipart body with no file part at all.
    let tail = format!("--{BOUNDARY}--\r\n");
    let response = send(
        &state,
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(tail))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ----------------------------------------------------------------------
// Auto-process chain (happy path)
// ----------------------------------------------------------------------

#[tokio::test]
async fn upload_with_auto_process_runs_the_default_chain() {
    let (_tmp, state) = test_state(true);

    // Subscribe before dispatch so terminal events cannot be missed.
    let mut subscription = state.bus.subscribe(None);

    let file_id = upload_ok(&state, "Adele - Hello.mp3", &[]).await;
    let file_id = kproc_common::FileId::parse(&file_id).unwrap();

    // Collect terminal events until the karaoke stage lands.
    let mut terminal_stages = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = subscription.recv().await {
            if event.progress == 100 && event.error.is_none() {
                terminal_stages.push(event.stage);
                if event.stage == StageKind::Karaoke {
                    break;
                }
            }
        }
    })
    .await
    .expect("chain did not finish in time");

    assert!(terminal_stages.contains(&StageKind::Separation));
    assert!(terminal_stages.contains(&StageKind::Transcription));
    assert!(terminal_stages.contains(&StageKind::Karaoke));

    // Durable state: markers on disk across both subtrees.
    assert!(state.store.stage_complete(file_id, StageKind::Separation));
    assert!(state.store.stage_complete(file_id, StageKind::Transcription));
    assert!(state.store.stage_complete(file_id, StageKind::Karaoke));
}

// ----------------------------------------------------------------------
// Process endpoint
// ----------------------------------------------------------------------

#[tokio::test]
async fn processing_twice_skips_the_second_run() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Track.mp3", &[("auto_process", "false")]).await;

    let uri = format!("/process/separation/{}", file_id);
    let first = body_json(post_json(&state, &uri, json!({"variant": "htdemucs"})).await).await;
    assert_eq!(first["status"], "completed");
    assert_eq!(first["skipped"], false);

    let second = body_json(post_json(&state, &uri, json!({"variant": "htdemucs"})).await).await;
    assert_eq!(second["status"], "completed");
    assert_eq!(second["skipped"], true);
    assert!(second["existing_output"].is_string());
    assert_eq!(first["files"], second["files"]);
}

#[tokio::test]
async fn karaoke_without_dependencies_is_rejected() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "NoDeps.mp3", &[("auto_process", "false")]).await;

    let response = post_empty(&state, &format!("/process/karaoke/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], 400);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("run separation first"));
    assert!(body["request_id"].is_string());

    // No karaoke artifacts materialized.
    let file_id = kproc_common::FileId::parse(&file_id).unwrap();
    assert!(!state.store.stage_complete(file_id, StageKind::Karaoke));
}

#[tokio::test]
async fn gpu_stage_without_gpu_is_service_unavailable() {
    let (_tmp, state) = test_state(false);
    let file_id = upload_ok(&state, "NoGpu.mp3", &[("auto_process", "false")]).await;

    let response = post_empty(&state, &format!("/process/transcription/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["error"], "GPU required but unavailable");
    assert_eq!(body["code"], 503);

    // The stub never ran: no transcription artifacts.
    let file_id = kproc_common::FileId::parse(&file_id).unwrap();
    assert!(!state
        .store
        .stage_complete(file_id, StageKind::Transcription));
}

#[tokio::test]
async fn smoke_mode_bypasses_the_gpu_gate() {
    let (_tmp, state) = test_state_with(false, |config| {
        config.ci_smoke_mode = true;
    });
    let file_id = upload_ok(&state, "Smoke.mp3", &[("auto_process", "false")]).await;

    let response = post_empty(&state, &format!("/process/transcription/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_model_and_variant_are_rejected() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Models.mp3", &[("auto_process", "false")]).await;

    let response = post_empty(&state, &format!("/process/upscale/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = post_json(
        &state,
        &format!("/process/separation/{}", file_id),
        json!({"variant": "nonsense"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn processing_unknown_file_is_not_found() {
    let (_tmp, state) = test_state(true);
    let response = post_empty(
        &state,
        &format!("/process/separation/{}", uuid::Uuid::new_v4()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ----------------------------------------------------------------------
// Status & listings
// ----------------------------------------------------------------------

#[tokio::test]
async fn status_aggregates_stage_completion() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Status.mp3", &[("auto_process", "false")]).await;

    let body = body_json(get(&state, &format!("/status/{}", file_id)).await).await;
    assert_eq!(body["stages"]["separation"]["complete"], false);

    post_empty(&state, &format!("/process/separation/{}", file_id)).await;
    let body = body_json(get(&state, &format!("/status/{}", file_id)).await).await;
    assert_eq!(body["stages"]["separation"]["complete"], true);
    assert!(body["stages"]["separation"]["files"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "vocals.mp3"));
    assert_eq!(body["stages"]["karaoke"]["complete"], false);
}

#[tokio::test]
async fn status_for_unknown_file_is_not_found_with_path() {
    let (_tmp, state) = test_state(true);
    let uri = format!("/status/{}", uuid::Uuid::new_v4());
    let response = get(&state, &uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], 404);
    assert_eq!(body["path"].as_str().unwrap(), uri);
}

#[tokio::test]
async fn songs_listing_carries_absolute_urls() {
    let (_tmp, state) = test_state(true);
    upload_ok(&state, "ListMe.mp3", &[("auto_process", "false")]).await;

    let response = send(
        &state,
        Request::builder()
            .uri("/songs")
            .header(header::HOST, "media.example.com:5000")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);

    let url = body["songs"][0]["url"].as_str().unwrap();
    assert!(
        url.starts_with("http://media.example.com:5000/download/"),
        "url not absolute: {}",
        url
    );
}

#[tokio::test]
async fn karaoke_listing_only_includes_finished_songs() {
    let (_tmp, state) = test_state(true);
    let plain = upload_ok(&state, "Plain.mp3", &[("auto_process", "false")]).await;
    let finished = upload_ok(&state, "Finished.mp3", &[("auto_process", "false")]).await;

    for stage in ["separation", "transcription", "karaoke"] {
        let response = post_empty(&state, &format!("/process/{}/{}", stage, finished)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = body_json(get(&state, "/karaoke/songs").await).await;
    assert_eq!(body["count"], 1);
    let entry = &body["songs"][0];
    assert_eq!(entry["file_id"].as_str().unwrap(), finished);
    assert!(entry["lrc_url"].as_str().unwrap().starts_with("http://"));
    assert!(entry["instrumental_url"]
        .as_str()
        .unwrap()
        .starts_with("http://"));
    assert_ne!(entry["file_id"].as_str().unwrap(), plain);
}

// ----------------------------------------------------------------------
// Downloads
// ----------------------------------------------------------------------

#[tokio::test]
async fn original_download_streams_with_content_type() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Stream.mp3", &[("auto_process", "false")]).await;

    let response = get(&state, &format!("/download/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "audio/mpeg"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"fake-audio-bytes");
}

#[tokio::test]
async fn artifact_download_serves_stage_outputs() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Artifacts.mp3", &[("auto_process", "false")]).await;
    post_empty(&state, &format!("/process/separation/{}", file_id)).await;

    let response = get(&state, &format!("/download/{}/vocals.mp3", file_id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&state, &format!("/download/{}/missing.mp3", file_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn karaoke_download_serves_the_lrc() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Kara - Oke.mp3", &[("auto_process", "false")]).await;
    for stage in ["separation", "transcription", "karaoke"] {
        post_empty(&state, &format!("/process/{}/{}", stage, file_id)).await;
    }

    let response = get(
        &state,
        &format!("/karaoke/{}/{}_karaoke.lrc", file_id, file_id),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let lrc = String::from_utf8_lossy(&bytes);
    assert!(lrc.contains("[ti:Oke]"));
    assert!(lrc.contains("[ar:Kara]"));
    assert!(lrc.contains("[00:00.00]"));
}

#[tokio::test]
async fn path_traversal_in_artifact_names_is_rejected() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Traverse.mp3", &[("auto_process", "false")]).await;

    let response = get(&state, &format!("/download/{}/..%2Fmetadata.json", file_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ----------------------------------------------------------------------
// Delete
// ----------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_everything_and_404s_afterwards() {
    let (_tmp, state) = test_state(true);
    let file_id = upload_ok(&state, "Doomed.mp3", &[("auto_process", "false")]).await;
    for stage in ["separation", "transcription", "karaoke"] {
        post_empty(&state, &format!("/process/{}/{}", stage, file_id)).await;
    }

    let response = delete(&state, &format!("/songs/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(!body["deleted"].as_array().unwrap().is_empty());
    assert!(body["warnings"].as_array().unwrap().is_empty());

    // Gone from status and listings.
    let response = get(&state, &format!("/status/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let songs = body_json(get(&state, "/songs").await).await;
    assert_eq!(songs["count"], 0);

    // Deleting again is a 404, not an error.
    let response = delete(&state, &format!("/songs/{}", file_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ----------------------------------------------------------------------
// Request context, CORS, error schema
// ----------------------------------------------------------------------

#[tokio::test]
async fn request_id_round_trips_header_and_error_body() {
    let (_tmp, state) = test_state(true);

    let response = send(
        &state,
        Request::builder()
            .uri(format!("/status/{}", uuid::Uuid::new_v4()))
            .header("X-Request-ID", "trace-me-123")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(
        response.headers()["x-request-id"].to_str().unwrap(),
        "trace-me-123"
    );
    let body = body_json(response).await;
    assert_eq!(body["request_id"], "trace-me-123");
}

#[tokio::test]
async fn request_id_is_generated_when_absent() {
    let (_tmp, state) = test_state(true);
    let response = get(&state, "/health").await;
    let value = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(value).is_ok());
}

#[tokio::test]
async fn expose_headers_have_no_duplicate_tokens() {
    let (_tmp, state) = test_state(true);
    let response = get(&state, "/health").await;

    let exposed = response
        .headers()
        .get("access-control-expose-headers")
        .unwrap()
        .to_str()
        .unwrap();
    let tokens: Vec<String> = exposed
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .collect();
    assert!(tokens.contains(&"x-request-id".to_string()));
    let mut deduped = tokens.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(tokens.len(), deduped.len(), "duplicate tokens in {}", exposed);
}

#[tokio::test]
async fn preflight_answers_no_content() {
    let (_tmp, state) = test_state(true);
    let response = send(
        &state,
        Request::builder()
            .method("OPTIONS")
            .uri("/upload")
            .header(header::ORIGIN, "http://app.example.com")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn unknown_route_is_json_with_path() {
    let (_tmp, state) = test_state(true);
    let response = get(&state, "/nope/nothing/here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], 404);
    assert_eq!(body["path"], "/nope/nothing/here");
    assert!(body["request_id"].is_string());
}
