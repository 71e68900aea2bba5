//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Perceptual-hash fallback registry (spec.md §3, §4.8, grounded on
//! `original_source/backend/watermarking/registry.py`).
//!
//! Consulted only when the frequency-domain detector in a modality engine
//! returns `detected = false`. A single JSON document, rewritten atomically
//! (temp file + rename) under a process-wide lock (spec.md §7 "global
//! mutable state").

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;
use crate::error::RegistryError;
use crate::video::Frame;

const IMAGE_HASH_SIZE: usize = 16;
const IMAGE_MATCH_MAX_DISTANCE: u32 = 64;
const VIDEO_KEYFRAMES: usize = 8;
const VIDEO_MATCH_MIN_RATIO: f64 = 0.5;
const AUDIO_BANDS: usize = 32;
const AUDIO_MATCH_MIN_SIMILARITY: f64 = 0.80;
const TEXT_MATCH_MIN_SIMILARITY: f64 = 0.40;
const TEXT_SHINGLE_MAX: usize = 200;

/// Default registry location: `registry.json` at the application root
/// (spec.md §7 "Persisted state"), overridable for tests.
pub fn default_registry_path() -> PathBuf {
    PathBuf::from(std::env::var("WM_REGISTRY_PATH").unwrap_or_else(|_| "registry.json".to_string()))
}

static REGISTRY_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Fingerprint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ahash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_ahashes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bands: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_shingles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub wm_id: String,
    pub data_type: String,
    pub registered_at: String,
    pub content_hash: String,
    pub wm_content_hash: String,
    #[serde(default)]
    pub fingerprint: Fingerprint,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub payload_hex: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LookupMatch {
    pub entry: RegistryEntry,
    /// `"exact"`, `"perceptual_image"`, `"perceptual_video"`,
    /// `"perceptual_audio"`, or `"perceptual_text"`.
    pub match_type: &'static str,
    pub confidence: f64,
}

/// Average hash (aHash) over a grayscale nearest-neighbor downscale of an
/// RGB image to `size × size`; bit set iff the pixel exceeds the mean.
pub fn image_ahash(rgb: &crate::image::RgbImage, size: usize) -> String {
    let gray = downscale_luma(&rgb.rgb, rgb.width as usize, rgb.height as usize, size, size);
    ahash_from_luma(&gray)
}

fn downscale_luma(rgb: &[u8], width: usize, height: usize, out_w: usize, out_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_w * out_h];
    for oy in 0..out_h {
        let sy = (oy * height / out_h).min(height.saturating_sub(1));
        for ox in 0..out_w {
            let sx = (ox * width / out_w).min(width.saturating_sub(1));
            let idx = (sy * width + sx) * 3;
            let (r, g, b) = (rgb[idx] as f64, rgb[idx + 1] as f64, rgb[idx + 2] as f64);
            out[oy * out_w + ox] = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn ahash_from_luma(gray: &[u8]) -> String {
    let mean = gray.iter().map(|&v| v as u32).sum::<u32>() as f64 / gray.len() as f64;
    let mut bytes = Vec::with_capacity(gray.len().div_ceil(8));
    for chunk in gray.chunks(8) {
        let mut byte = 0u8;
        for (i, &v) in chunk.iter().enumerate() {
            if v as f64 > mean {
                byte |= 1 << (7 - i);
            }
        }
        bytes.push(byte);
    }
    hex::encode(bytes)
}

/// Hamming distance between two equal-length hex-encoded bit strings.
/// Mismatched lengths never match, so `999` (spec-silent sentinel,
/// `original_source/.../registry.py` `_hamming_distance`) is returned.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    let (Ok(ba), Ok(bb)) = (hex::decode(a), hex::decode(b)) else {
        return 999;
    };
    if ba.len() != bb.len() {
        return 999;
    }
    ba.iter().zip(bb.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// aHash of 8 evenly-spaced frames (spec.md §4.8).
pub fn video_frame_hashes(frames: &[Frame]) -> Vec<String> {
    if frames.is_empty() {
        return Vec::new();
    }
    let n = frames.len();
    let count = VIDEO_KEYFRAMES.min(n);
    (0..count)
        .map(|i| {
            let idx = (i * n / count).min(n - 1);
            let frame = &frames[idx];
            // bgr -> rgb for luma
            let mut rgb = Vec::with_capacity(frame.bgr.len());
            for px in frame.bgr.chunks(3) {
                rgb.push(px[2]);
                rgb.push(px[1]);
                rgb.push(px[0]);
            }
            let gray = downscale_luma(&rgb, frame.width as usize, frame.height as usize, IMAGE_HASH_SIZE, IMAGE_HASH_SIZE);
            ahash_from_luma(&gray)
        })
        .collect()
}

/// 32-band, L2-normalized rFFT magnitude spectral fingerprint.
pub fn audio_spectral_fingerprint(mono: &[f64]) -> Vec<f64> {
    if mono.is_empty() {
        return vec![0.0; AUDIO_BANDS];
    }
    let peak = mono.iter().fold(0.0f64, |acc, &v| acc.max(v.abs())).max(1e-9);
    let normalized: Vec<f64> = mono.iter().map(|&v| v / peak).collect();

    let n = normalized.len();
    let mut buf: Vec<Complex64> = normalized.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);
    let half = n / 2 + 1;
    let magnitudes: Vec<f64> = buf[..half].iter().map(|c| c.norm()).collect();

    let band_size = (magnitudes.len() / AUDIO_BANDS).max(1);
    let mut bands = vec![0.0; AUDIO_BANDS];
    for (b, band) in bands.iter_mut().enumerate() {
        let start = b * band_size;
        let end = if b == AUDIO_BANDS - 1 { magnitudes.len() } else { (start + band_size).min(magnitudes.len()) };
        if start < end {
            *band = magnitudes[start..end].iter().sum::<f64>() / (end - start) as f64;
        }
    }
    let norm = bands.iter().map(|v| v * v).sum::<f64>().sqrt().max(1e-12);
    bands.iter().map(|&v| (v / norm * 1e6).round() / 1e6).collect()
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Lowercase-whitespace 3-gram shingles, MD5-hashed to their first 8 hex
/// chars, deduped, sorted, capped at 200.
pub fn text_shingles(text: &str) -> Vec<String> {
    let words: Vec<String> = text.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words.len() < 3 {
        return Vec::new();
    }
    let mut set: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for window in words.windows(3) {
        let shingle = window.join(" ");
        let digest = Md5::digest(shingle.as_bytes());
        set.insert(hex::encode(&digest[..4]));
    }
    set.into_iter().take(TEXT_SHINGLE_MAX).collect()
}

pub fn jaccard_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: std::collections::HashSet<&String> = a.iter().collect();
    let sb: std::collections::HashSet<&String> = b.iter().collect();
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Read the registry, treating a missing or corrupt file as empty
/// (spec.md §7 "Registry I/O failure").
fn read_registry(path: &Path) -> Vec<RegistryEntry> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

fn write_registry(path: &Path, entries: &[RegistryEntry]) -> Result<(), RegistryError> {
    let json = serde_json::to_string_pretty(entries).map_err(|e| RegistryError::Write(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp_path).map_err(|e| RegistryError::Write(e.to_string()))?;
        f.write_all(json.as_bytes()).map_err(|e| RegistryError::Write(e.to_string()))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| RegistryError::Write(e.to_string()))?;
    Ok(())
}

/// Register a successful embed. Duplicate `wm_id` is a no-op (spec.md §3
/// Lifecycle). Uses the process-wide lock around the whole
/// read-modify-write sequence.
#[allow(clippy::too_many_arguments)]
pub fn register(
    path: &Path,
    wm_id: &str,
    data_type: &str,
    original_bytes: &[u8],
    watermarked_bytes: &[u8],
    fingerprint: Fingerprint,
    model_name: Option<&str>,
    context: Option<&str>,
    payload_hex: Option<&str>,
) -> Result<(), RegistryError> {
    let _guard = REGISTRY_LOCK.lock().unwrap();
    let mut entries = read_registry(path);
    if entries.iter().any(|e| e.wm_id == wm_id) {
        return Ok(());
    }
    entries.push(RegistryEntry {
        wm_id: wm_id.to_string(),
        data_type: data_type.to_string(),
        registered_at: chrono::Utc::now().to_rfc3339(),
        content_hash: sha256_hex(original_bytes),
        wm_content_hash: sha256_hex(watermarked_bytes),
        fingerprint,
        model_name: model_name.map(str::to_string),
        context: context.map(str::to_string),
        payload_hex: payload_hex.map(str::to_string),
    });
    write_registry(path, &entries)
}

pub fn lookup_by_id(path: &Path, wm_id: &str) -> Option<RegistryEntry> {
    let _guard = REGISTRY_LOCK.lock().unwrap();
    read_registry(path).into_iter().find(|e| e.wm_id == wm_id)
}

fn lookup_by_hash(entries: &[RegistryEntry], content_bytes: &[u8]) -> Option<RegistryEntry> {
    let hash = sha256_hex(content_bytes);
    entries
        .iter()
        .find(|e| e.content_hash == hash || e.wm_content_hash == hash)
        .cloned()
}

/// Exact hash lookup, then perceptual-by-modality fallback (spec.md §4.8
/// "Lookup order").
pub fn lookup_content(path: &Path, data_type: &str, content_bytes: &[u8], perceptual: &Fingerprint) -> Option<LookupMatch> {
    let _guard = REGISTRY_LOCK.lock().unwrap();
    let entries = read_registry(path);
    if let Some(entry) = lookup_by_hash(&entries, content_bytes) {
        return Some(LookupMatch { entry, match_type: "exact", confidence: 0.95 });
    }

    match data_type {
        "image" => {
            let query = perceptual.image_ahash.as_ref()?;
            entries
                .into_iter()
                .filter_map(|e| {
                    let hash = e.fingerprint.image_ahash.as_ref()?;
                    let dist = hamming_distance(query, hash);
                    (dist <= IMAGE_MATCH_MAX_DISTANCE).then_some((e, dist))
                })
                .min_by_key(|(_, dist)| *dist)
                .map(|(entry, _)| LookupMatch { entry, match_type: "perceptual_image", confidence: 0.85 })
        }
        "video" => {
            let query = perceptual.video_ahashes.as_ref()?;
            entries
                .into_iter()
                .filter_map(|e| {
                    let hashes = e.fingerprint.video_ahashes.as_ref()?;
                    let matches = query
                        .iter()
                        .filter(|qh| hashes.iter().any(|h| hamming_distance(qh, h) <= IMAGE_MATCH_MAX_DISTANCE))
                        .count();
                    let ratio = matches as f64 / query.len().max(1) as f64;
                    (ratio >= VIDEO_MATCH_MIN_RATIO).then_some((e, ratio))
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                .map(|(entry, _)| LookupMatch { entry, match_type: "perceptual_video", confidence: 0.85 })
        }
        "audio" => {
            let query = perceptual.audio_bands.as_ref()?;
            entries
                .into_iter()
                .filter_map(|e| {
                    let bands = e.fingerprint.audio_bands.as_ref()?;
                    let sim = cosine_similarity(query, bands);
                    (sim >= AUDIO_MATCH_MIN_SIMILARITY).then_some((e, sim))
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                .map(|(entry, _)| LookupMatch { entry, match_type: "perceptual_audio", confidence: 0.85 })
        }
        "text" => {
            let query = perceptual.text_shingles.as_ref()?;
            entries
                .into_iter()
                .filter_map(|e| {
                    let shingles = e.fingerprint.text_shingles.as_ref()?;
                    let sim = jaccard_similarity(query, shingles);
                    (sim >= TEXT_MATCH_MIN_SIMILARITY).then_some((e, sim))
                })
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                .map(|(entry, _)| LookupMatch { entry, match_type: "perceptual_text", confidence: 0.85 })
        }
        _ => None,
    }
}

/// Stricter variant of [`lookup_content`] (DESIGN.md Open Question 2): a
/// perceptual hit only counts if the stored `payload_hex` is also present,
/// instead of trusting the registry as sole authority for signature_valid.
pub fn lookup_strict(path: &Path, data_type: &str, content_bytes: &[u8], perceptual: &Fingerprint) -> Option<LookupMatch> {
    lookup_content(path, data_type, content_bytes, perceptual).filter(|m| m.entry.payload_hex.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        drop(f);
        path
    }

    #[test]
    fn register_then_lookup_by_id() {
        let path = temp_path();
        register(&path, "abc123", "text", b"orig", b"wm", Fingerprint::default(), Some("m"), None, None).unwrap();
        let entry = lookup_by_id(&path, "abc123").unwrap();
        assert_eq!(entry.data_type, "text");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn duplicate_register_is_noop() {
        let path = temp_path();
        register(&path, "id1", "text", b"a", b"b", Fingerprint::default(), None, None, None).unwrap();
        register(&path, "id1", "text", b"c", b"d", Fingerprint::default(), None, None, None).unwrap();
        let _guard_entries = read_registry(&path);
        assert_eq!(_guard_entries.len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_registry_file_is_treated_as_empty() {
        let path = PathBuf::from("/tmp/wm-registry-does-not-exist-xyz.json");
        assert!(lookup_by_id(&path, "nope").is_none());
    }

    #[test]
    fn s6_exact_and_perceptual_hash_lookup() {
        let path = temp_path();
        let fp = Fingerprint { image_ahash: Some("ff00ff00ff00ff00ff00ff00ff00ff00".to_string()), ..Default::default() };
        register(&path, "img1", "image", b"original-bytes", b"watermarked-bytes", fp.clone(), None, None, None).unwrap();

        let exact = lookup_content(&path, "image", b"watermarked-bytes", &Fingerprint::default()).unwrap();
        assert_eq!(exact.match_type, "exact");

        let query = Fingerprint { image_ahash: Some("ff00ff00ff00ff00ff00ff00ff00ff01".to_string()), ..Default::default() };
        let perceptual = lookup_content(&path, "image", b"unrelated-bytes", &query).unwrap();
        assert_eq!(perceptual.match_type, "perceptual_image");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn text_shingle_and_jaccard_roundtrip() {
        let a = text_shingles("the quick brown fox jumps over the lazy dog");
        let b = text_shingles("the quick brown fox leaps over the lazy dog");
        assert!(jaccard_similarity(&a, &a) > 0.99);
        assert!(jaccard_similarity(&a, &b) > 0.2);
    }

    #[test]
    fn hamming_distance_mismatched_length_is_sentinel() {
        assert_eq!(hamming_distance("ab", "abcd"), 999);
        assert_eq!(hamming_distance("ff", "00"), 8);
    }
}
