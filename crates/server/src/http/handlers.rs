//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! HTTP endpoint handlers for the wm-engine service.
//!
//! `watermark_handler`/`verify_handler` dispatch straight into
//! `wm_core::dispatcher`, running the CPU-bound modality engine call inside
//! `tokio::task::spawn_blocking` (spec.md §5) so a large video/audio embed
//! never blocks the async executor.

use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use tracing::{info, warn};
use wm_core::dispatcher::{self, Modality};

use super::state::AppState;
use super::types::{
    ApiError, ForensicDetails, HealthResponse, InsightAndRisk, IntegrityProof, VerificationResult,
    VerifyRequest, VerifyResponse, WatermarkMetadata, WatermarkRequest, WatermarkResponse,
};

type ErrResponse = (StatusCode, Json<ApiError>);

fn err(status: StatusCode, msg: impl Into<String>) -> ErrResponse {
    (status, Json(ApiError { error: msg.into() }))
}

/// GET /healthz — returns service health status.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// POST /api/watermark — embed a watermark and persist a registry entry.
pub async fn watermark_handler(
    State(state): State<AppState>,
    Json(req): Json<WatermarkRequest>,
) -> Result<Json<WatermarkResponse>, ErrResponse> {
    let Some(modality) = Modality::parse(&req.data_type) else {
        return Err(err(StatusCode::BAD_REQUEST, format!("unsupported data_type: {}", req.data_type)));
    };

    let raw = dispatcher::decode_input(modality, &req.data)
        .map_err(|e| err(StatusCode::BAD_REQUEST, format!("invalid data: {e}")))?;

    let key = state.key.clone();
    let strength = req.watermark_strength;
    let model_name = req.model_name.clone();
    let context = req.context.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        dispatcher::embed(modality, &raw, &key, strength, model_name.as_deref(), None, context.as_deref())
            .map(|outcome| (raw, outcome))
    })
    .await
    .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, format!("embed task panicked: {e}")))?
    .map_err(|e| {
        warn!("watermarking failed: {e}");
        err(StatusCode::INTERNAL_SERVER_ERROR, format!("watermarking failed: {e}"))
    })?;

    let (original_bytes, outcome) = outcome;
    info!(data_type = req.data_type, method = outcome.embedding_method, "embedded watermark");

    let registry_path = state.registry_path.clone();
    let model_name = req.model_name.clone();
    let context = req.context.clone();
    let outcome_for_registry = outcome.clone();
    tokio::task::spawn_blocking(move || {
        dispatcher::register_embed(&registry_path, modality, &original_bytes, &outcome_for_registry, model_name.as_deref(), context.as_deref())
    })
    .await
    .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, format!("registry task panicked: {e}")))?;

    let watermarked_data = dispatcher::encode_output(modality, &outcome.watermarked);

    Ok(Json(WatermarkResponse {
        watermarked_data,
        watermark_metadata: WatermarkMetadata {
            watermark_id: outcome.wm_id,
            embedding_method: outcome.embedding_method,
            cryptographic_signature: outcome.cryptographic_signature,
            fingerprint_hash: outcome.fingerprint_hash,
            model_name: req.model_name,
            context: req.context,
            registry_stored: true,
        },
        integrity_proof: IntegrityProof {
            algorithm: "HMAC-SHA256",
            timestamp: outcome.timestamp_iso,
        },
    }))
}

/// POST /api/verify — stateless verification with registry fallback and
/// risk classification.
pub async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ErrResponse> {
    let Some(modality) = Modality::parse(&req.data_type) else {
        return Err(err(StatusCode::BAD_REQUEST, format!("unsupported data_type: {}", req.data_type)));
    };

    let raw = dispatcher::decode_input(modality, &req.data)
        .map_err(|e| err(StatusCode::BAD_REQUEST, format!("invalid data: {e}")))?;

    let analysis_timestamp = Utc::now().to_rfc3339();
    let key = state.key.clone();
    let registry_path = state.registry_path.clone();

    let outcome = tokio::task::spawn_blocking(move || dispatcher::verify(modality, &raw, &key, &registry_path))
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, format!("verify task panicked: {e}")))?
        .map_err(|e| {
            warn!("verification failed: {e}");
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("verification failed: {e}"))
        })?;

    let risk = dispatcher::classify_risk(outcome.watermark_detected, outcome.context.as_deref());

    Ok(Json(VerifyResponse {
        verification_result: VerificationResult {
            watermark_detected: outcome.watermark_detected,
            confidence_score: (outcome.confidence_score * 1e4).round() / 1e4,
            matched_watermark_id: outcome.matched_watermark_id,
            model_name: outcome.model_name.or(req.model_name),
            context: outcome.context,
            detection_source: outcome.detection_source,
        },
        insight_and_risk: InsightAndRisk {
            predicted_risk_score: risk.score,
            predicted_risk_level: risk.level,
            insight: risk.insight,
            automated_decision: risk.decision,
        },
        forensic_details: ForensicDetails {
            signature_valid: outcome.signature_valid,
            tamper_detected: outcome.tamper_detected,
            statistical_score: (outcome.statistical_score * 1e6).round() / 1e6,
            registry_match: outcome.registry_match,
        },
        analysis_timestamp,
    }))
}
