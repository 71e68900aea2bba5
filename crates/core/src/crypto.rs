//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Cryptographic primitives shared by every modality engine: SHA-256,
//! HMAC-SHA-256, constant-time tag comparison, and keyed-PRNG seed
//! derivation (spec.md §3 "Keyed-PRNG seeding").

use hmac::{Hmac, Mac};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::key::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `data`, raw 32 bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of `data` as lowercase hex — used for registry content hashes and
/// fingerprints.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// HMAC-SHA-256(key, message), raw 32 bytes.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time equality over two byte slices of possibly-differing length.
/// A length mismatch returns `false` without leaking byte-wise timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Derive the 31-bit keyed seed used for every pseudo-random choice in the
/// engine (spec.md §3): `u32(SHA-256(K ∥ domain_tag)[0..4]) mod 2^31`.
pub fn keyed_seed(key: &SecretKey, domain_tag: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(key.expose_secret());
    hasher.update(domain_tag);
    let digest = hasher.finalize();
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    raw % (1u32 << 31)
}

/// Build the deterministic CSPRNG for a given domain tag. Every mask, QIM
/// position table, and carrier/copy assignment is reproducible from `K`
/// alone via this constructor.
pub fn keyed_rng(key: &SecretKey, domain_tag: &[u8]) -> ChaCha20Rng {
    let seed = keyed_seed(key, domain_tag);
    // Expand the 31-bit seed into a full 256-bit ChaCha seed via SHA-256 so
    // distinct domain tags never collide in the RNG's seed space.
    let mut hasher = Sha256::new();
    hasher.update(b"wm_rng_seed");
    hasher.update(seed.to_be_bytes());
    let expanded: [u8; 32] = hasher.finalize().into();
    ChaCha20Rng::from_seed(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"key", b"message");
        let b = hmac_sha256(b"key", b"message");
        assert_eq!(a, b);
        let c = hmac_sha256(b"other-key", b"message");
        assert_ne!(a, c);
    }

    #[test]
    fn constant_time_eq_matches_naive_eq() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
    }

    #[test]
    fn keyed_seed_is_deterministic_and_domain_separated() {
        let k = SecretKey::from_bytes(b"k1".to_vec());
        let s1 = keyed_seed(&k, b"audio_fft");
        let s2 = keyed_seed(&k, b"audio_fft");
        let s3 = keyed_seed(&k, b"video_qim");
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert!(s1 < (1u32 << 31));
    }

    #[test]
    fn keyed_rng_is_reproducible() {
        use rand_core::RngCore;
        let k = SecretKey::from_bytes(b"k1".to_vec());
        let mut r1 = keyed_rng(&k, b"tile_map");
        let mut r2 = keyed_rng(&k, b"tile_map");
        assert_eq!(r1.next_u64(), r2.next_u64());
    }
}
