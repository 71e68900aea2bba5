//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Request/response bodies for `/api/watermark` and `/api/verify`
//! (spec.md §6), grounded on `original_source/backend/main.py`'s
//! `WatermarkRequest`/`VerifyRequest` and the two endpoints' literal
//! response shapes.

use serde::{Deserialize, Serialize};

fn default_strength() -> f64 {
    0.8
}

#[derive(Debug, Deserialize)]
pub struct WatermarkRequest {
    pub data_type: String,
    pub data: String,
    #[serde(default = "default_strength")]
    pub watermark_strength: f64,
    pub model_name: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WatermarkMetadata {
    pub watermark_id: Option<String>,
    pub embedding_method: &'static str,
    pub cryptographic_signature: String,
    pub fingerprint_hash: String,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub registry_stored: bool,
}

#[derive(Debug, Serialize)]
pub struct IntegrityProof {
    pub algorithm: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct WatermarkResponse {
    pub watermarked_data: String,
    pub watermark_metadata: WatermarkMetadata,
    pub integrity_proof: IntegrityProof,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub data_type: String,
    pub data: String,
    pub model_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub watermark_detected: bool,
    pub confidence_score: f64,
    pub matched_watermark_id: Option<String>,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub detection_source: String,
}

#[derive(Debug, Serialize)]
pub struct InsightAndRisk {
    pub predicted_risk_score: u32,
    pub predicted_risk_level: &'static str,
    pub insight: String,
    pub automated_decision: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ForensicDetails {
    pub signature_valid: bool,
    pub tamper_detected: bool,
    pub statistical_score: f64,
    pub registry_match: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verification_result: VerificationResult,
    pub insight_and_risk: InsightAndRisk,
    pub forensic_details: ForensicDetails,
    pub analysis_timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}
