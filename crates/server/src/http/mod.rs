//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! HTTP layer — Axum-based REST API for wm-engine.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod types;

pub use config::Config;
pub use router::create_router;
pub use state::AppState;
