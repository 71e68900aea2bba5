//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Video engine: per-frame DCT statistical mark (every 10th frame, on Y of
//! BGR→YCrCb) + QIM payload on the green BGR channel of 5 keyframes
//! (spec.md §4.6, grounded on
//! `original_source/backend/watermarking/video_watermark.py`).
//!
//! Frame container I/O (binary codec plumbing, spec.md §1 out-of-scope) is a
//! minimal lossless raw-BGR container — see [`encode_container`] /
//! [`decode_container`] — standing in for an HFYU-muxed AVI so that the
//! green-channel QIM layer round-trips exactly, per spec.md §4.6's
//! "output container must be lossless" requirement.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand_core::RngCore;

use crate::crypto::keyed_rng;
use crate::dct::{clip_u8, dct2, idct2, round_half_away_from_zero, BLOCK};
use crate::error::CodecError;
use crate::key::SecretKey;
use crate::payload::{build_payload, derive_wm_id, from_bits, parse_payload, to_bits, PAYLOAD_BITS};

const SAMPLE_EVERY: usize = 10;
const PAYLOAD_FRAMES: usize = 5;
const QIM_STEP: f64 = 32.0;
const RHO_THRESHOLD: f64 = 0.04;

/// One decoded BGR frame, row-major, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub bgr: Vec<u8>,
}

const CONTAINER_MAGIC: &[u8; 4] = b"WMVR";

/// Encode frames into the lossless raw-BGR container: magic, width, height,
/// fps (f64), frame count, then each frame's raw BGR bytes verbatim.
pub fn encode_container(frames: &[Frame], fps: f64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CONTAINER_MAGIC);
    let (w, h) = frames.first().map(|f| (f.width, f.height)).unwrap_or((0, 0));
    out.extend_from_slice(&w.to_be_bytes());
    out.extend_from_slice(&h.to_be_bytes());
    out.extend_from_slice(&fps.to_be_bytes());
    out.extend_from_slice(&(frames.len() as u32).to_be_bytes());
    for frame in frames {
        out.extend_from_slice(&frame.bgr);
    }
    out
}

/// Inverse of [`encode_container`]. Returns `(frames, fps)`.
pub fn decode_container(bytes: &[u8]) -> Result<(Vec<Frame>, f64), CodecError> {
    if bytes.len() < 4 + 4 + 4 + 8 + 4 || &bytes[0..4] != CONTAINER_MAGIC {
        return Err(CodecError::Video("bad container magic".into()));
    }
    let width = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let height = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let fps = f64::from_be_bytes(bytes[12..20].try_into().unwrap());
    let count = u32::from_be_bytes(bytes[20..24].try_into().unwrap()) as usize;
    let frame_bytes = (width * height * 3) as usize;
    let mut offset = 24;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < offset + frame_bytes {
            return Err(CodecError::Video("truncated frame stream".into()));
        }
        frames.push(Frame {
            width,
            height,
            bgr: bytes[offset..offset + frame_bytes].to_vec(),
        });
        offset += frame_bytes;
    }
    Ok((frames, fps))
}

fn bgr_to_ycrcb(b: u8, g: u8, r: u8) -> (f64, f64, f64) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    (y, cr, cb)
}

fn ycrcb_to_bgr(y: f64, cr: f64, cb: f64) -> (u8, u8, u8) {
    let r = y + 1.403 * (cr - 128.0);
    let b = y + 1.773 * (cb - 128.0);
    let g = (y - 0.299 * r - 0.114 * b) / 0.587;
    (clip_u8(b), clip_u8(g), clip_u8(r))
}

fn y_plane_of(frame: &Frame) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = (frame.width * frame.height) as usize;
    let mut y = vec![0.0; n];
    let mut cr = vec![0.0; n];
    let mut cb = vec![0.0; n];
    for i in 0..n {
        let (yy, ccr, ccb) = bgr_to_ycrcb(frame.bgr[i * 3], frame.bgr[i * 3 + 1], frame.bgr[i * 3 + 2]);
        y[i] = yy;
        cr[i] = ccr;
        cb[i] = ccb;
    }
    (y, cr, cb)
}

fn write_y_plane(frame: &mut Frame, y: &[f64], cr: &[f64], cb: &[f64]) {
    let n = (frame.width * frame.height) as usize;
    for i in 0..n {
        let (b, g, r) = ycrcb_to_bgr(y[i], cr[i], cb[i]);
        frame.bgr[i * 3] = b;
        frame.bgr[i * 3 + 1] = g;
        frame.bgr[i * 3 + 2] = r;
    }
}

fn green_plane_of(frame: &Frame) -> Vec<f64> {
    let n = (frame.width * frame.height) as usize;
    (0..n).map(|i| frame.bgr[i * 3 + 1] as f64).collect()
}

fn write_green_plane(frame: &mut Frame, g: &[f64]) {
    for (i, &v) in g.iter().enumerate() {
        frame.bgr[i * 3 + 1] = clip_u8(v);
    }
}

fn get_block(plane: &[f64], width: usize, row: usize, col: usize) -> [[f64; BLOCK]; BLOCK] {
    let mut block = [[0.0; BLOCK]; BLOCK];
    for i in 0..BLOCK {
        for j in 0..BLOCK {
            block[i][j] = plane[(row + i) * width + (col + j)];
        }
    }
    block
}

fn set_block(plane: &mut [f64], width: usize, row: usize, col: usize, block: &[[f64; BLOCK]; BLOCK]) {
    for i in 0..BLOCK {
        for j in 0..BLOCK {
            plane[(row + i) * width + (col + j)] = block[i][j];
        }
    }
}

/// Memoization caches keyed by `(key bytes, H, W)` (spec.md §5): the DCT ±1
/// mask and QIM position table are pure functions of key and dimensions, so
/// every frame of a video reuses the same computation.
type CacheKey = (Vec<u8>, u32, u32);
type QimPosition = (usize, usize, usize, usize);

static MASK_CACHE: Lazy<Mutex<HashMap<CacheKey, Vec<f64>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static QIM_CACHE: Lazy<Mutex<HashMap<CacheKey, Vec<QimPosition>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn dct_mask(key: &SecretKey, height: u32, width: u32) -> Vec<f64> {
    let cache_key = (key.expose_secret().to_vec(), height, width);
    let mut cache = MASK_CACHE.lock().unwrap();
    if let Some(m) = cache.get(&cache_key) {
        return m.clone();
    }
    let mut rng = keyed_rng(key, b"video_dct");
    let mask: Vec<f64> = (0..(height * width) as usize)
        .map(|_| if rng.next_u32() & 1 == 0 { -1.0 } else { 1.0 })
        .collect();
    cache.insert(cache_key, mask.clone());
    mask
}

/// 272 unique `(br, bc, u, v)` positions drawn from the keyed PRNG (spec.md
/// §4.6 Layer 2), cached by `(key, H, W)`.
fn qim_positions(key: &SecretKey, height: u32, width: u32) -> Vec<QimPosition> {
    let cache_key = (key.expose_secret().to_vec(), height, width);
    let mut cache = QIM_CACHE.lock().unwrap();
    if let Some(p) = cache.get(&cache_key) {
        return p.clone();
    }
    let nb_h = ((height as usize) / BLOCK).max(1);
    let nb_w = ((width as usize) / BLOCK).max(1);
    let mut rng = keyed_rng(key, b"video_qim");
    let mut seen = HashSet::with_capacity(PAYLOAD_BITS);
    let mut positions = Vec::with_capacity(PAYLOAD_BITS);
    while positions.len() < PAYLOAD_BITS {
        let br = (rng.next_u32() as usize) % nb_h;
        let bc = (rng.next_u32() as usize) % nb_w;
        let u = 1 + (rng.next_u32() as usize) % 4;
        let v = 1 + (rng.next_u32() as usize) % 4;
        if seen.insert((br, bc, u, v)) {
            positions.push((br, bc, u, v));
        }
    }
    cache.insert(cache_key, positions.clone());
    positions
}

fn key_frame_indices(n_frames: usize) -> Vec<usize> {
    if n_frames == 0 {
        return Vec::new();
    }
    (0..PAYLOAD_FRAMES)
        .map(|i| {
            let raw = round_half_away_from_zero((i * n_frames) as f64 / PAYLOAD_FRAMES as f64) as usize;
            raw % n_frames
        })
        .collect()
}

fn apply_dct_stat(plane: &mut [f64], width: usize, height: usize, mask: &[f64], alpha: f64) {
    let nb_h = height / BLOCK;
    let nb_w = width / BLOCK;
    for br in 0..nb_h {
        for bc in 0..nb_w {
            let (row, col) = (br * BLOCK, bc * BLOCK);
            let block = get_block(plane, width, row, col);
            let mut coeffs = dct2(&block);
            for u in 1..5 {
                for v in 1..5 {
                    coeffs[u][v] += alpha * mask[(row + u) * width + (col + v)];
                }
            }
            let spatial = idct2(&coeffs);
            let mut clipped = [[0.0; BLOCK]; BLOCK];
            for i in 0..BLOCK {
                for j in 0..BLOCK {
                    clipped[i][j] = clip_u8(spatial[i][j]) as f64;
                }
            }
            set_block(plane, width, row, col, &clipped);
        }
    }
}

fn dct_correlation(plane: &[f64], width: usize, height: usize, mask: &[f64]) -> f64 {
    let nb_h = height / BLOCK;
    let nb_w = width / BLOCK;
    let mut extracted = Vec::with_capacity(nb_h * nb_w * 16);
    let mut mask_vals = Vec::with_capacity(nb_h * nb_w * 16);
    for br in 0..nb_h {
        for bc in 0..nb_w {
            let (row, col) = (br * BLOCK, bc * BLOCK);
            let coeffs = dct2(&get_block(plane, width, row, col));
            for u in 1..5 {
                for v in 1..5 {
                    extracted.push(coeffs[u][v]);
                    mask_vals.push(mask[(row + u) * width + (col + v)]);
                }
            }
        }
    }
    pearson(&extracted, &mask_vals)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for i in 0..a.len() {
        let (da, db) = (a[i] - mean_a, b[i] - mean_b);
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a.sqrt() < 1e-9 || var_b.sqrt() < 1e-9 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// `(dct_row, dct_col, payload_bit_index)` within one 8x8 block.
type BlockBit = (usize, usize, usize);

fn embed_qim_plane(plane: &mut [f64], width: usize, positions: &[QimPosition], bits: &[u8]) {
    // Group by block so each 8x8 block's DCT is computed once even if it
    // carries more than one payload bit.
    let mut by_block: HashMap<(usize, usize), Vec<BlockBit>> = HashMap::new();
    for (i, &(br, bc, u, v)) in positions.iter().enumerate() {
        by_block.entry((br, bc)).or_default().push((u, v, i));
    }
    for ((br, bc), coeffs_here) in by_block {
        let (row, col) = (br * BLOCK, bc * BLOCK);
        let block = get_block(plane, width, row, col);
        let mut coeffs = dct2(&block);
        for (u, v, bit_idx) in coeffs_here {
            if bit_idx >= bits.len() {
                continue;
            }
            let mut q = round_half_away_from_zero(coeffs[u][v] / QIM_STEP) as i64;
            if (q.rem_euclid(2)) as u8 != bits[bit_idx] {
                q += if bits[bit_idx] == 1 { 1 } else { -1 };
            }
            coeffs[u][v] = q as f64 * QIM_STEP;
        }
        let spatial = idct2(&coeffs);
        let mut clipped = [[0.0; BLOCK]; BLOCK];
        for i in 0..BLOCK {
            for j in 0..BLOCK {
                clipped[i][j] = clip_u8(spatial[i][j]) as f64;
            }
        }
        set_block(plane, width, row, col, &clipped);
    }
}

fn extract_qim_plane(plane: &[f64], width: usize, positions: &[QimPosition]) -> Vec<u8> {
    let mut by_block: HashMap<(usize, usize), [[f64; BLOCK]; BLOCK]> = HashMap::new();
    positions
        .iter()
        .map(|&(br, bc, u, v)| {
            let coeffs = by_block
                .entry((br, bc))
                .or_insert_with(|| dct2(&get_block(plane, width, br * BLOCK, bc * BLOCK)));
            (round_half_away_from_zero(coeffs[u][v] / QIM_STEP) as i64).unsigned_abs() as u8 % 2
        })
        .collect()
}

pub struct VideoEmbedInfo {
    pub embedding_method: &'static str,
    pub alpha: f64,
    pub total_frames: usize,
    pub stat_frames: usize,
    pub payload_frames: usize,
}

/// Embed the watermark across `frames`. `strength` maps to `alpha =
/// strength * 4.0` (`original_source/backend/main.py` `_dispatch_embed`).
pub fn embed(
    frames: &[Frame],
    key: &SecretKey,
    strength: f64,
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    context: Option<&str>,
) -> (Vec<Frame>, VideoEmbedInfo) {
    let alpha = strength * 4.0;
    let n = frames.len();
    let (height, width) = frames.first().map(|f| (f.height, f.width)).unwrap_or((0, 0));

    if n == 0 {
        return (
            Vec::new(),
            VideoEmbedInfo {
                embedding_method: "dct_qim_dual_layer",
                alpha,
                total_frames: 0,
                stat_frames: 0,
                payload_frames: 0,
            },
        );
    }

    let mask = dct_mask(key, height, width);
    let payload = build_payload(model_name, timestamp_iso, key, context);
    let payload_bits = to_bits(&payload);
    let positions = qim_positions(key, height, width);
    let kf_set: HashSet<usize> = key_frame_indices(n).into_iter().collect();

    let mut out = Vec::with_capacity(n);
    let mut stat_count = 0usize;
    for (idx, frame) in frames.iter().enumerate() {
        let mut out_frame = frame.clone();
        if idx % SAMPLE_EVERY == 0 {
            let (mut y, cr, cb) = y_plane_of(frame);
            apply_dct_stat(&mut y, width as usize, height as usize, &mask, alpha);
            write_y_plane(&mut out_frame, &y, &cr, &cb);
            stat_count += 1;
        }
        if kf_set.contains(&idx) {
            let mut g = green_plane_of(&out_frame);
            embed_qim_plane(&mut g, width as usize, &positions, &payload_bits);
            write_green_plane(&mut out_frame, &g);
        }
        out.push(out_frame);
    }

    (
        out,
        VideoEmbedInfo {
            embedding_method: "dct_qim_dual_layer",
            alpha,
            total_frames: n,
            stat_frames: stat_count,
            payload_frames: kf_set.len(),
        },
    )
}

#[derive(Debug, Clone)]
pub struct VideoVerifyResult {
    pub detected: bool,
    pub correlation: f64,
    pub confidence: f64,
    pub signature_valid: bool,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub timestamp_unix: Option<u32>,
    pub wm_id: Option<String>,
}

/// Verify with selective decoding: the statistical layer is only computed
/// on sampled frames and the QIM layer only on keyframes (spec.md §4.6).
pub fn verify(frames: &[Frame], key: &SecretKey, threshold: Option<f64>) -> VideoVerifyResult {
    let threshold = threshold.unwrap_or(RHO_THRESHOLD);
    let n = frames.len();
    let mut result = VideoVerifyResult {
        detected: false,
        correlation: 0.0,
        confidence: 0.0,
        signature_valid: false,
        model_name: None,
        context: None,
        timestamp_unix: None,
        wm_id: None,
    };
    if n == 0 {
        return result;
    }

    let (height, width) = (frames[0].height, frames[0].width);
    let mask = dct_mask(key, height, width);
    let positions = qim_positions(key, height, width);
    let kf_indices: HashSet<usize> = key_frame_indices(n).into_iter().collect();

    let mut corr_vals = Vec::new();
    let mut copy_bits = Vec::new();
    for (idx, frame) in frames.iter().enumerate() {
        if idx % SAMPLE_EVERY == 0 {
            let (y, _cr, _cb) = y_plane_of(frame);
            corr_vals.push(dct_correlation(&y, width as usize, height as usize, &mask));
        }
        if kf_indices.contains(&idx) {
            let g = green_plane_of(frame);
            copy_bits.push(extract_qim_plane(&g, width as usize, &positions));
        }
    }

    let rho = if corr_vals.is_empty() {
        0.0
    } else {
        corr_vals.iter().sum::<f64>() / corr_vals.len() as f64
    };
    let stat_detected = rho > threshold;
    let stat_conf = ((rho - threshold) / (1.0 - threshold).max(0.01)).clamp(0.0, 1.0);

    let mut sig_valid = false;
    if !copy_bits.is_empty() {
        let voted: Vec<u8> = (0..PAYLOAD_BITS)
            .map(|i| {
                let ones: usize = copy_bits.iter().filter(|cb: &&Vec<u8>| cb[i] == 1).count();
                if ones * 2 > copy_bits.len() { 1 } else { 0 }
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

    result.correlation = rho;
    result.confidence = stat_conf.max(if sig_valid { 0.9 } else { 0.0 });
    result.detected = stat_detected || sig_valid;
    result.signature_valid = sig_valid;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_bytes(b"video-engine-key".to_vec())
    }

    fn checker_frames(n: usize, size: u32) -> Vec<Frame> {
        (0..n)
            .map(|f| {
                let mut bgr = Vec::with_capacity((size * size * 3) as usize);
                for r in 0..size {
                    for c in 0..size {
                        let v = (((r + c + f as u32) * 17) % 256) as u8;
                        bgr.push(v);
                        bgr.push(255 - v);
                        bgr.push(v / 2);
                    }
                }
                Frame { width: size, height: size, bgr }
            })
            .collect()
    }

    #[test]
    fn container_round_trips() {
        let frames = checker_frames(3, 32);
        let bytes = encode_container(&frames, 25.0);
        let (decoded, fps) = decode_container(&bytes).unwrap();
        assert_eq!(fps, 25.0);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].bgr, frames[0].bgr);
    }

    #[test]
    fn embed_then_verify_recovers_payload() {
        let k = key();
        let frames = checker_frames(40, 64);
        let (wm_frames, info) = embed(&frames, &k, 0.8, Some("claude-sonnet-4"), None, None);
        assert_eq!(info.payload_frames, PAYLOAD_FRAMES);

        let container = encode_container(&wm_frames, 25.0);
        let (decoded, _) = decode_container(&container).unwrap();
        let result = verify(&decoded, &k, None);
        assert!(result.signature_valid, "{:?}", result);
        assert_eq!(result.model_name.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn wrong_key_fails_signature() {
        let k = key();
        let other = SecretKey::from_bytes(b"other".to_vec());
        let frames = checker_frames(40, 64);
        let (wm_frames, _) = embed(&frames, &k, 0.8, Some("m"), None, None);
        let result = verify(&wm_frames, &other, None);
        assert!(!result.signature_valid);
    }

    #[test]
    fn empty_video_is_not_detected() {
        let k = key();
        let result = verify(&[], &k, None);
        assert!(!result.detected);
    }
}
