//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Service configuration loaded from environment variables.

use anyhow::Result;
use std::env;

/// Runtime configuration for the wm-engine HTTP service.
///
/// The key itself is loaded via `SecretKey::from_env` (falls back to an
/// insecure development default with a warning) — `Config` only tracks the
/// remaining knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Perceptual-hash registry JSON file path.
    pub registry_path: std::path::PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let registry_path = env::var("WM_REGISTRY_PATH")
            .unwrap_or_else(|_| "registry.json".to_string())
            .into();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        Ok(Config { registry_path, port })
    }
}
