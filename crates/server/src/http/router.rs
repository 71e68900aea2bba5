//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Axum router composition for the wm-engine HTTP layer.
//!
//! Routes:
//!   POST  /api/watermark  — embed a watermark
//!   POST  /api/verify     — verify a watermark
//!   GET   /healthz        — health check

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    handlers::{health_handler, verify_handler, watermark_handler},
    state::AppState,
};

/// Compose the full Axum router for the wm-engine service.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/watermark", post(watermark_handler))
        .route("/api/verify", post(verify_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
        // Same-origin only — no dashboard, no cross-origin requests needed.
        .layer(CorsLayer::new())
        .layer(TraceLayer::new_for_http())
}
