//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Text engine: KGW green-token Z-score statistical layer + redundant
//! carrier-word zero-width steganography (spec.md §4.3, grounded on
//! `original_source/backend/watermarking/text_watermark.py`).

use std::collections::HashSet;

use rand_core::RngCore;

use crate::crypto::{keyed_rng, sha256};
use crate::key::SecretKey;
use crate::payload::{build_payload, derive_wm_id, from_bits, parse_payload, to_bits, PAYLOAD_BITS};
use crate::zw::{decode_to_bits, encode_bits, is_zw_char};

const VOCAB_SIZE: u32 = 50_000;
const GREEN_FRACTION: f64 = 0.5;
const REDUNDANCY: usize = 5;
const Z_THRESHOLD: f64 = 1.5;

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| ".,!?;:\"'()[]{}\n\r\t".contains(c))
        .to_lowercase()
}

fn word_to_token_id(word: &str) -> u32 {
    use md5::{Digest, Md5};
    let cleaned = normalize_word(word);
    let digest = Md5::digest(cleaned.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % VOCAB_SIZE
}

/// Deterministic green-token set, drawn via the keyed PRNG with the raw
/// domain tag `b""` (spec.md §4.3: "the raw SHA-256(K) seed").
fn build_green_set(key: &SecretKey) -> HashSet<u32> {
    let mut rng = keyed_rng(key, b"");
    let target = (VOCAB_SIZE as f64 * GREEN_FRACTION) as usize;
    let mut pool: Vec<u32> = (0..VOCAB_SIZE).collect();
    // Partial Fisher-Yates: shuffle only as many elements as we need.
    let mut set = HashSet::with_capacity(target);
    for i in 0..target {
        let remaining = (VOCAB_SIZE as usize - i) as u32;
        let j = i + (rng.next_u32() % remaining) as usize;
        pool.swap(i, j);
        set.insert(pool[i]);
    }
    set
}

fn is_carrier(word: &str, key: &SecretKey) -> bool {
    let cleaned = normalize_word(word);
    if cleaned.is_empty() {
        return false;
    }
    let mut buf = key.expose_secret().to_vec();
    buf.extend_from_slice(b"\x00carrier\x00");
    buf.extend_from_slice(cleaned.as_bytes());
    sha256(&buf)[0] & 1 == 1
}

fn carrier_copy(word: &str, key: &SecretKey) -> usize {
    let cleaned = normalize_word(word);
    let mut buf = key.expose_secret().to_vec();
    buf.extend_from_slice(b"\x00copy\x00");
    buf.extend_from_slice(cleaned.as_bytes());
    (sha256(&buf)[0] as usize) % REDUNDANCY
}

/// Split a raw whitespace token into its base word and any trailing ZW chars.
fn split_token(token: &str) -> (String, Vec<char>) {
    let base: String = token.chars().filter(|c| !is_zw_char(*c)).collect();
    let zws: Vec<char> = token.chars().filter(|c| is_zw_char(*c)).collect();
    (base, zws)
}

#[derive(Debug, Clone)]
pub struct TextEmbedInfo {
    pub embedding_method: &'static str,
    pub total_tokens: usize,
    pub carrier_tokens: usize,
    pub green_token_count: usize,
    pub green_ratio: f64,
    pub redundancy: usize,
    pub payload_complete: bool,
}

/// Embed the watermark into `text`. Returns the watermarked text and
/// embedding metadata. A text with zero tokens is returned unchanged
/// (spec.md §7 "short content").
pub fn embed(
    text: &str,
    key: &SecretKey,
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    context: Option<&str>,
) -> (String, TextEmbedInfo) {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return (
            text.to_string(),
            TextEmbedInfo {
                embedding_method: "kgw_carrier_redundant_steganography_v3",
                total_tokens: 0,
                carrier_tokens: 0,
                green_token_count: 0,
                green_ratio: 0.0,
                redundancy: REDUNDANCY,
                payload_complete: false,
            },
        );
    }

    let green_set = build_green_set(key);
    let green_count = tokens.iter().filter(|t| green_set.contains(&word_to_token_id(t))).count();

    let payload = build_payload(model_name, timestamp_iso, key, context);
    let payload_bits = to_bits(&payload);

    let mut all_carriers: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| is_carrier(t, key))
        .map(|(i, _)| i)
        .collect();
    if all_carriers.is_empty() {
        all_carriers = (0..tokens.len()).collect();
    }

    let mut copy_carriers: Vec<Vec<usize>> = vec![Vec::new(); REDUNDANCY];
    for &ci in &all_carriers {
        copy_carriers[carrier_copy(tokens[ci], key)].push(ci);
    }

    let mut out_tokens: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
    let total_zw = PAYLOAD_BITS.div_ceil(2);

    for ccl in &copy_carriers {
        if ccl.is_empty() {
            continue;
        }
        let zw_per_word = total_zw.div_ceil(ccl.len());
        let zw_per_word = zw_per_word.max(1);
        let mut bit_i = 0usize;
        for &ci in ccl {
            let mut bits_for_word = Vec::with_capacity(zw_per_word * 2);
            for _ in 0..zw_per_word {
                if bit_i >= PAYLOAD_BITS {
                    break;
                }
                let b0 = payload_bits[bit_i];
                let b1 = if bit_i + 1 < PAYLOAD_BITS { payload_bits[bit_i + 1] } else { 0 };
                bits_for_word.push(b0);
                bits_for_word.push(b1);
                bit_i += 2;
            }
            if !bits_for_word.is_empty() {
                out_tokens[ci].push_str(&encode_bits(&bits_for_word));
            }
        }
    }

    let payload_complete = copy_carriers.iter().all(|c| !c.is_empty());

    (
        out_tokens.join(" "),
        TextEmbedInfo {
            embedding_method: "kgw_carrier_redundant_steganography_v3",
            total_tokens: tokens.len(),
            carrier_tokens: all_carriers.len(),
            green_token_count: green_count,
            green_ratio: green_count as f64 / tokens.len() as f64,
            redundancy: REDUNDANCY,
            payload_complete,
        },
    )
}

#[derive(Debug, Clone)]
pub struct TextVerifyResult {
    pub detected: bool,
    pub z_score: f64,
    pub confidence: f64,
    pub signature_valid: bool,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub timestamp_unix: Option<u32>,
    pub wm_id: Option<String>,
    pub green_count: usize,
    pub expected_green: f64,
}

pub fn verify(text: &str, key: &SecretKey) -> TextVerifyResult {
    let clean: String = text.chars().filter(|c| !is_zw_char(*c)).collect();
    let tokens: Vec<&str> = clean.split_whitespace().collect();
    let n = tokens.len();

    let mut result = TextVerifyResult {
        detected: false,
        z_score: 0.0,
        confidence: 0.0,
        signature_valid: false,
        model_name: None,
        context: None,
        timestamp_unix: None,
        wm_id: None,
        green_count: 0,
        expected_green: 0.0,
    };
    if n == 0 {
        return result;
    }

    let green_set = build_green_set(key);
    let gamma = GREEN_FRACTION;
    let o_g = tokens.iter().filter(|t| green_set.contains(&word_to_token_id(t))).count();
    let e_g = n as f64 * gamma;
    let sigma_g = (n as f64 * gamma * (1.0 - gamma)).sqrt();
    let z = (o_g as f64 - e_g) / sigma_g.max(1e-9);
    let stat_conf = 1.0 / (1.0 + (-(z - Z_THRESHOLD)).exp());

    let mut copy_bits: Vec<Vec<u8>> = vec![Vec::new(); REDUNDANCY];
    for raw_token in text.split_whitespace() {
        let (base_word, zw_chars) = split_token(raw_token);
        if zw_chars.is_empty() || !is_carrier(&base_word, key) {
            continue;
        }
        let r = carrier_copy(&base_word, key);
        let zw_str: String = zw_chars.into_iter().collect();
        copy_bits[r].extend(decode_to_bits(&zw_str));
    }

    let complete: Vec<&[u8]> = copy_bits
        .iter()
        .filter(|c| c.len() >= PAYLOAD_BITS)
        .map(|c| &c[..PAYLOAD_BITS])
        .collect();

    let mut sig_valid = false;
    if !complete.is_empty() {
        let voted: Vec<u8> = (0..PAYLOAD_BITS)
            .map(|i| {
                let ones: usize = complete.iter().filter(|c| c[i] == 1).count();
                if ones * 2 > complete.len() { 1 } else { 0 }
            })
            .collect();
        let raw = from_bits(&voted);
        if let Some(parsed) = parse_payload(&raw, key) {
            sig_valid = true;
            result.wm_id = derive_wm_id(parsed.model_name.as_deref(), Some(parsed.timestamp_unix), key);
            result.model_name = parsed.model_name;
            result.context = parsed.context;
            result.timestamp_unix = Some(parsed.timestamp_unix);
        }
    }

    let steg_conf = if sig_valid { 0.9 } else { 0.0 };
    result.confidence = stat_conf.max(steg_conf);
    result.detected = z > Z_THRESHOLD || sig_valid;
    result.z_score = z;
    result.signature_valid = sig_valid;
    result.green_count = o_g;
    result.expected_green = e_g;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_bytes(b"text-engine-key".to_vec())
    }

    const SAMPLE: &str = "The quick brown fox jumps over the lazy dog. Watermarking is a technique to embed hidden information in generated content so that downstream consumers can trace its provenance reliably across many different platforms and tools without needing any external database lookups at verification time.";

    #[test]
    fn s1_round_trip_recovers_payload() {
        let k = key();
        let (wm, info) = embed(SAMPLE, &k, Some("claude-sonnet-4"), None, None);
        assert!(info.total_tokens > 0);
        let result = verify(&wm, &k);
        assert!(result.signature_valid, "expected signature_valid, got {:?}", result);
        assert_eq!(result.model_name.as_deref(), Some("claude-sonnet-4"));
        assert!(result.wm_id.is_some());
    }

    #[test]
    fn wrong_key_does_not_validate() {
        let k = key();
        let other = SecretKey::from_bytes(b"a-different-key".to_vec());
        let (wm, _) = embed(SAMPLE, &k, Some("m"), None, None);
        let result = verify(&wm, &other);
        assert!(!result.signature_valid);
    }

    #[test]
    fn empty_text_is_not_detected_and_embed_is_identity() {
        let k = key();
        let (wm, info) = embed("", &k, Some("m"), None, None);
        assert_eq!(wm, "");
        assert_eq!(info.total_tokens, 0);
        let result = verify("", &k);
        assert!(!result.detected);
    }

    #[test]
    fn s2_drops_of_non_carrier_words_still_recover_payload() {
        let k = key();
        let (wm, _) = embed(SAMPLE, &k, Some("m"), None, Some("ctx"));
        let words: Vec<&str> = wm.split_whitespace().collect();
        // Drop every 5th word (≈20%), skipping those that carry a ZW payload.
        let kept: Vec<&str> = words
            .iter()
            .enumerate()
            .filter(|(i, w)| i % 5 != 0 || w.chars().any(is_zw_char))
            .map(|(_, w)| *w)
            .collect();
        let degraded = kept.join(" ");
        let result = verify(&degraded, &k);
        assert!(result.signature_valid);
    }
}
