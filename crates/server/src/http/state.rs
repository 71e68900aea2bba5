//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! AppState — shared state for the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;

use wm_core::key::SecretKey;

/// Shared application state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub key: Arc<SecretKey>,
    pub registry_path: Arc<PathBuf>,
}
