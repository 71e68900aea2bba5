//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! The 34-byte signed watermark payload and its codec.
//!
//! Layout (spec.md §3, `original_source/backend/watermarking/payload.py`):
//!
//! ```text
//! [0:2]   magic      "WM"           0x57 0x4D
//! [2:6]   timestamp   unix uint32 big-endian
//! [6:22]  model_name  UTF-8, zero-padded/truncated to 16 bytes
//! [22:30] context     UTF-8, zero-padded/truncated to 8 bytes
//! [30:34] auth_tag    HMAC-SHA-256(K, bytes[0:30])[0:4]
//! ```

use chrono::DateTime;

use crate::crypto::{constant_time_eq, hmac_sha256, sha256_hex};
use crate::key::SecretKey;

pub const MAGIC: [u8; 2] = [0x57, 0x4D];
const MODEL_LEN: usize = 16;
const CTX_LEN: usize = 8;
/// Total payload length in bytes: magic(2) + ts(4) + model(16) + ctx(8) + tag(4).
pub const PAYLOAD_LEN: usize = 2 + 4 + MODEL_LEN + CTX_LEN + 4;
pub const PAYLOAD_BITS: usize = PAYLOAD_LEN * 8;

/// A parsed, authenticated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPayload {
    pub model_name: Option<String>,
    pub timestamp_unix: u32,
    pub context: Option<String>,
    pub valid: bool,
}

fn pad_truncate(s: &str, len: usize) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.truncate(len);
    bytes.resize(len, 0);
    bytes
}

fn strip_zero_padding(bytes: &[u8]) -> String {
    let trimmed = match bytes.iter().position(|&b| b == 0) {
        Some(idx) => &bytes[..idx],
        None => bytes,
    };
    String::from_utf8_lossy(trimmed).into_owned()
}

/// Parse an ISO-8601 timestamp into unix seconds (wrapped mod 2^32); falls
/// back to current wall-clock time if parsing fails, exactly as
/// `build_payload` in `original_source/backend/watermarking/payload.py` does.
fn parse_timestamp_or_now(timestamp_iso: Option<&str>) -> u32 {
    resolve_timestamp_unix(timestamp_iso)
}

/// Public entry point for callers (the dispatcher) that need to resolve a
/// timestamp to the exact unix-seconds value `build_payload` will embed,
/// e.g. to derive a matching `wm_id` before the payload is built.
pub fn resolve_timestamp_unix(timestamp_iso: Option<&str>) -> u32 {
    let parsed = timestamp_iso.and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    let secs = match parsed {
        Some(dt) => dt.timestamp(),
        None => chrono::Utc::now().timestamp(),
    };
    (secs as u64 & 0xFFFF_FFFF) as u32
}

/// Build the 34-byte signed payload. Deterministic given identical inputs
/// (spec.md §4.1 `build_payload`).
pub fn build_payload(
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    key: &SecretKey,
    context: Option<&str>,
) -> Vec<u8> {
    let ts = parse_timestamp_or_now(timestamp_iso);
    let model_b = pad_truncate(model_name.unwrap_or(""), MODEL_LEN);
    let ctx_b = pad_truncate(context.unwrap_or(""), CTX_LEN);

    let mut pre_auth = Vec::with_capacity(PAYLOAD_LEN - 4);
    pre_auth.extend_from_slice(&MAGIC);
    pre_auth.extend_from_slice(&ts.to_be_bytes());
    pre_auth.extend_from_slice(&model_b);
    pre_auth.extend_from_slice(&ctx_b);

    let tag = hmac_sha256(key.expose_secret(), &pre_auth);

    let mut payload = pre_auth;
    payload.extend_from_slice(&tag[..4]);
    payload
}

/// Parse and authenticate a payload. Returns `None` on any failure (short
/// input, magic mismatch, or HMAC mismatch under constant-time compare) —
/// never an error, per spec.md §4.1/§7.
pub fn parse_payload(bytes: &[u8], key: &SecretKey) -> Option<ParsedPayload> {
    if bytes.len() < PAYLOAD_LEN {
        return None;
    }
    let bytes = &bytes[..PAYLOAD_LEN];
    if bytes[0..2] != MAGIC {
        return None;
    }

    let pre_auth = &bytes[0..PAYLOAD_LEN - 4];
    let tag = &bytes[PAYLOAD_LEN - 4..];
    let expected_tag = hmac_sha256(key.expose_secret(), pre_auth);
    if !constant_time_eq(tag, &expected_tag[..4]) {
        return None;
    }

    let ts = u32::from_be_bytes(bytes[2..6].try_into().unwrap());
    let model = strip_zero_padding(&bytes[6..6 + MODEL_LEN]);
    let ctx = strip_zero_padding(&bytes[6 + MODEL_LEN..6 + MODEL_LEN + CTX_LEN]);

    Some(ParsedPayload {
        model_name: if model.is_empty() { None } else { Some(model) },
        timestamp_unix: ts,
        context: if ctx.is_empty() { None } else { Some(ctx) },
        valid: true,
    })
}

/// 8 bits per byte, MSB first.
pub fn to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for i in (0..8).rev() {
            bits.push((b >> i) & 1);
        }
    }
    bits
}

/// Inverse of [`to_bits`]; pads with zero bits to the next byte boundary.
pub fn from_bits(bits: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bits.len().div_ceil(8));
    let mut chunk_iter = bits.chunks(8);
    for chunk in &mut chunk_iter {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            byte |= (bit & 1) << (7 - i);
        }
        if chunk.len() < 8 {
            byte <<= 8 - chunk.len();
        }
        bytes.push(byte);
    }
    bytes
}

/// `SHA-256(K ∥ ts_be32 ∥ model_padded_16)` as lowercase hex. Deterministic
/// at both embed and verify — no stored mapping required.
pub fn derive_wm_id(model_name: Option<&str>, ts_unix: Option<u32>, key: &SecretKey) -> Option<String> {
    let ts = ts_unix?;
    let model_b = pad_truncate(model_name.unwrap_or(""), MODEL_LEN);
    let mut buf = Vec::with_capacity(key.expose_secret().len() + 4 + MODEL_LEN);
    buf.extend_from_slice(key.expose_secret());
    buf.extend_from_slice(&ts.to_be_bytes());
    buf.extend_from_slice(&model_b);
    Some(sha256_hex(&buf))
}
