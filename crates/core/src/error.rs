//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Unified error hierarchy for the watermark engine.
//!
//! Per-content-defect outcomes ("not watermarked", "too short to carry a
//! payload", HMAC mismatch) are never errors — they are modeled as values in
//! [`crate::dispatcher::ModalityResult`]. Only hard decode failures (can't
//! parse the container at all) surface here.

use thiserror::Error;

/// Top-level error type for watermark engine operations.
#[derive(Error, Debug)]
pub enum WmError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors decoding a modality's native container (PNG/WAV/PDF/frame stream).
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed base64: {0}")]
    Base64(String),

    #[error("unsupported WAV format: {0}")]
    UnsupportedWav(String),

    #[error("undecodable PNG: {0}")]
    Png(String),

    #[error("undecodable PDF: {0}")]
    Pdf(String),

    #[error("undecodable video container: {0}")]
    Video(String),
}

/// Errors from the persistent perceptual-fingerprint registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry store corrupt, treating as empty: {0}")]
    Corrupt(String),

    #[error("registry write failed: {0}")]
    Write(String),
}
