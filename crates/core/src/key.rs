//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! The deployment secret key `K`.
//!
//! Loaded once at process start-up from `WM_SECRET_KEY` (raw UTF-8 bytes) or
//! a fixed development default, then treated as immutable for the process
//! lifetime. `Debug` always redacts the key, and the backing bytes are
//! zeroized on drop.

use std::env;
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable carrying the raw deployment secret.
pub const SECRET_KEY_ENV: &str = "WM_SECRET_KEY";

/// Used only when `WM_SECRET_KEY` is unset — never in a real deployment.
const DEV_DEFAULT_KEY: &[u8] = b"lyra-dev-watermark-key-insecure-default";

/// The deployment secret key `K`. Arbitrary-length bytes, HMAC-keyed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Wrap raw key bytes directly (tests, explicit key injection).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Load from `WM_SECRET_KEY`, falling back to the development default
    /// with a warning if unset.
    pub fn from_env() -> Self {
        match env::var(SECRET_KEY_ENV) {
            Ok(v) if !v.is_empty() => Self(v.into_bytes()),
            _ => {
                tracing::warn!(
                    "{} not set; using insecure development default key",
                    SECRET_KEY_ENV
                );
                Self(DEV_DEFAULT_KEY.to_vec())
            }
        }
    }

    pub fn expose_secret(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let k = SecretKey::from_bytes(b"super-secret".to_vec());
        assert_eq!(format!("{:?}", k), "SecretKey([REDACTED])");
    }

    #[test]
    fn expose_secret_returns_bytes() {
        let k = SecretKey::from_bytes(b"abc".to_vec());
        assert_eq!(k.expose_secret(), b"abc");
    }
}
