//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! wm-engine HTTP server library — Axum router, state, and config.
//!
//! The `wm-server` binary is a thin shell over this crate: all routing
//! logic lives here so integration tests can exercise it directly.

pub mod http;
