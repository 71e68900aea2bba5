//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Integration tests for wm-server startup wiring.
//!
//! Validates: Config loading from environment, AppState construction, and
//! router request handling for the health check and watermark/verify routes.
//!
//! NOTE: Tests that manipulate environment variables (PORT, WM_REGISTRY_PATH)
//! share the same process address space. They use a per-process Mutex to run
//! serially and avoid races.

use std::sync::{Arc, Mutex, OnceLock};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use wm_core::key::SecretKey;
use wm_server::http::{create_router, AppState, Config};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

#[tokio::test]
async fn test_config_from_env_defaults() {
    let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());

    std::env::remove_var("PORT");
    std::env::remove_var("WM_REGISTRY_PATH");

    let config = Config::from_env().expect("Config::from_env() should succeed with no env vars");

    assert_eq!(config.port, 8080, "default port should be 8080");
    assert_eq!(
        config.registry_path.to_str(),
        Some("registry.json"),
        "default registry path should be registry.json"
    );
}

#[tokio::test]
async fn test_config_from_env_overrides() {
    let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());

    std::env::set_var("PORT", "9100");
    std::env::set_var("WM_REGISTRY_PATH", "/tmp/wm-test-registry.json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.port, 9100);
    assert_eq!(config.registry_path.to_str(), Some("/tmp/wm-test-registry.json"));

    std::env::remove_var("PORT");
    std::env::remove_var("WM_REGISTRY_PATH");
}

fn test_state() -> AppState {
    AppState {
        key: Arc::new(SecretKey::from_bytes(b"wiring-test-key".to_vec())),
        registry_path: Arc::new(std::env::temp_dir().join("wm-wiring-registry.json")),
    }
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let router = create_router(test_state());

    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "OK");
}

#[tokio::test]
async fn test_watermark_then_verify_round_trip() {
    let router = create_router(test_state());

    let embed_req = Request::builder()
        .method("POST")
        .uri("/api/watermark")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data_type": "text",
                "data": "The quick brown fox jumps over the lazy dog near the riverbank at dawn.",
                "model_name": "claude-sonnet-4",
            })
            .to_string(),
        ))
        .unwrap();

    let embed_resp = router.clone().oneshot(embed_req).await.unwrap();
    assert_eq!(embed_resp.status(), StatusCode::OK);
    let body = to_bytes(embed_resp.into_body(), usize::MAX).await.unwrap();
    let embedded: Value = serde_json::from_slice(&body).unwrap();
    let watermarked_data = embedded["watermarked_data"].as_str().unwrap().to_string();
    assert!(embedded["watermark_metadata"]["watermark_id"].as_str().unwrap().len() == 64);

    let verify_req = Request::builder()
        .method("POST")
        .uri("/api/verify")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data_type": "text",
                "data": watermarked_data,
            })
            .to_string(),
        ))
        .unwrap();

    let verify_resp = router.oneshot(verify_req).await.unwrap();
    assert_eq!(verify_resp.status(), StatusCode::OK);
    let body = to_bytes(verify_resp.into_body(), usize::MAX).await.unwrap();
    let verified: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(verified["verification_result"]["watermark_detected"], true);
    assert_eq!(verified["forensic_details"]["signature_valid"], true);
}

#[tokio::test]
async fn test_watermark_rejects_unknown_data_type() {
    let router = create_router(test_state());

    let req = Request::builder()
        .method("POST")
        .uri("/api/watermark")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "data_type": "spreadsheet",
                "data": "irrelevant",
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
