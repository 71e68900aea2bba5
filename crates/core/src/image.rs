//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Image engine: PNG text metadata layer + mid-band DCT statistical mark +
//! tiled QIM payload layer, all on the Y (luma) plane (spec.md §4.4,
//! grounded on `original_source/backend/watermarking/image_watermark.py`).

use std::io::Cursor;

use png::text_metadata::{ITXtChunk, TEXtChunk};
use rand_core::RngCore;

use crate::crypto::keyed_rng;
use crate::dct::{clip_u8, dct2, idct2, round_half_away_from_zero, BLOCK};
use crate::error::CodecError;
use crate::key::SecretKey;
use crate::payload::{build_payload, derive_wm_id, from_bits, parse_payload, to_bits, PAYLOAD_BITS};
use crate::zw::{decode_to_bits, encode_bits};

const U_QIM: usize = 3;
const V_QIM: usize = 3;
const QIM_STEP: f64 = 48.0;
const TILE_ROWS: usize = 18;
const TILE_COLS: usize = 17;
const RHO_THRESHOLD: f64 = 0.04;

pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    /// 3 bytes (R,G,B) per pixel, row-major.
    pub rgb: Vec<u8>,
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
    let cr = 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;
    (y, cb, cr)
}

fn ycbcr_to_rgb(y: f64, cb: f64, cr: f64) -> (u8, u8, u8) {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344136 * (cb - 128.0) - 0.714136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    (clip_u8(r), clip_u8(g), clip_u8(b))
}

pub fn decode_png(bytes: &[u8]) -> Result<(RgbImage, Vec<(String, String)>), CodecError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| CodecError::Png(e.to_string()))?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| CodecError::Png(e.to_string()))?;
    let bytes_used = &buf[..info.buffer_size()];

    let samples = info.color_type.samples();
    let width = info.width;
    let height = info.height;
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for px in bytes_used.chunks(samples) {
        match samples {
            1 => {
                rgb.push(px[0]);
                rgb.push(px[0]);
                rgb.push(px[0]);
            }
            2 => {
                rgb.push(px[0]);
                rgb.push(px[0]);
                rgb.push(px[0]);
            }
            3 | 4 => {
                rgb.push(px[0]);
                rgb.push(px[1]);
                rgb.push(px[2]);
            }
            _ => return Err(CodecError::Png("unsupported channel count".into())),
        }
    }

    let mut texts = Vec::new();
    for t in &reader.info().uncompressed_latin1_text {
        texts.push((t.keyword.clone(), t.text.clone()));
    }
    for t in &reader.info().utf8_text {
        if let Ok(text) = t.get_text() {
            texts.push((t.keyword.clone(), text));
        }
    }

    Ok((RgbImage { width, height, rgb }, texts))
}

/// `text_chunks`: `(keyword, text, utf8)` — utf8=true writes an iTXt chunk
/// (required for our non-Latin-1 zero-width payload text), false writes tEXt.
pub fn encode_png(img: &RgbImage, text_chunks: &[(&str, &str, bool)]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, img.width, img.height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().expect("valid PNG header");
        for (keyword, text, utf8) in text_chunks {
            if *utf8 {
                let chunk = ITXtChunk::new(keyword.to_string(), text.to_string());
                writer.write_text_chunk(&chunk).expect("valid text chunk");
            } else {
                let chunk = TEXtChunk::new(keyword.to_string(), text.to_string());
                writer.write_text_chunk(&chunk).expect("valid text chunk");
            }
        }
        writer.write_image_data(&img.rgb).expect("valid image data");
    }
    out
}

fn to_y_plane(img: &RgbImage) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = (img.width * img.height) as usize;
    let mut y = vec![0.0; n];
    let mut cb = vec![0.0; n];
    let mut cr = vec![0.0; n];
    for i in 0..n {
        let (yy, ccb, ccr) = rgb_to_ycbcr(img.rgb[i * 3], img.rgb[i * 3 + 1], img.rgb[i * 3 + 2]);
        y[i] = yy;
        cb[i] = ccb;
        cr[i] = ccr;
    }
    (y, cb, cr)
}

fn from_y_plane(y: &[f64], cb: &[f64], cr: &[f64], width: u32, height: u32) -> RgbImage {
    let n = (width * height) as usize;
    let mut rgb = Vec::with_capacity(n * 3);
    for i in 0..n {
        let (r, g, b) = ycbcr_to_rgb(y[i], cb[i], cr[i]);
        rgb.push(r);
        rgb.push(g);
        rgb.push(b);
    }
    RgbImage { width, height, rgb }
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

/// Keyed ±1 mask over the full image domain.
fn make_dct_mask(key: &SecretKey, height: usize, width: usize) -> Vec<f64> {
    let mut rng = keyed_rng(key, b"image_dct");
    (0..height * width)
        .map(|_| if rng.next_u32() & 1 == 0 { -1.0 } else { 1.0 })
        .collect()
}

/// Keyed shuffle of positions 0..300, mapping each payload bit index to a
/// unique location (spec.md §4.4 Layer C).
fn make_tile_map(key: &SecretKey) -> Vec<usize> {
    let mut rng = keyed_rng(key, b"tile_map");
    let mut positions: Vec<usize> = (0..300).collect();
    // Fisher-Yates shuffle using the keyed RNG.
    for i in (1..positions.len()).rev() {
        let j = (rng.next_u32() as usize) % (i + 1);
        positions.swap(i, j);
    }
    positions[..PAYLOAD_BITS].to_vec()
}

pub struct ImageEmbedInfo {
    pub embedding_method: &'static str,
    pub alpha: f64,
    pub width: u32,
    pub height: u32,
    pub blocks_processed: usize,
}

/// Embed the watermark in a decoded PNG image. `strength` maps to
/// `alpha = strength * 10` per spec.md §4.4.
#[allow(clippy::needless_range_loop)]
pub fn embed(
    img: &RgbImage,
    key: &SecretKey,
    strength: f64,
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    context: Option<&str>,
) -> (Vec<u8>, ImageEmbedInfo) {
    let alpha = strength * 10.0;
    let (width, height) = (img.width as usize, img.height as usize);
    let (mut y, cb, cr) = to_y_plane(img);
    let mask = make_dct_mask(key, height, width);

    let nb_h = height / BLOCK;
    let nb_w = width / BLOCK;
    let mut blocks_processed = 0usize;

    // Layer A: DCT statistical mark.
    for br in 0..nb_h {
        for bc in 0..nb_w {
            let (row, col) = (br * BLOCK, bc * BLOCK);
            let block = get_block(&y, width, row, col);
            let mut coeffs = dct2(&block);
            for u in 1..5 {
                for v in 1..5 {
                    let idx = (row + u) * width + (col + v);
                    coeffs[u][v] += alpha * mask[idx];
                }
            }
            let spatial = idct2(&coeffs);
            let mut clipped = [[0.0; BLOCK]; BLOCK];
            for i in 0..BLOCK {
                for j in 0..BLOCK {
                    clipped[i][j] = clip_u8(spatial[i][j]) as f64;
                }
            }
            set_block(&mut y, width, row, col, &clipped);
            blocks_processed += 1;
        }
    }

    // Layer B: tiled QIM payload.
    let payload = build_payload(model_name, timestamp_iso, key, context);
    let payload_bits = to_bits(&payload);
    let tile_map = make_tile_map(key);
    let mut loc_to_bit = std::collections::HashMap::new();
    for (bit_idx, &loc) in tile_map.iter().enumerate() {
        loc_to_bit.insert(loc, payload_bits[bit_idx]);
    }

    for br in 0..nb_h {
        for bc in 0..nb_w {
            let loc = (br % TILE_ROWS) * TILE_COLS + (bc % TILE_COLS);
            if let Some(&bit) = loc_to_bit.get(&loc) {
                let (row, col) = (br * BLOCK, bc * BLOCK);
                let block = get_block(&y, width, row, col);
                let mut coeffs = dct2(&block);
                let mut q = round_half_away_from_zero(coeffs[U_QIM][V_QIM] / QIM_STEP) as i64;
                if (q.rem_euclid(2)) as u8 != bit {
                    q += if bit == 1 { 1 } else { -1 };
                }
                coeffs[U_QIM][V_QIM] = q as f64 * QIM_STEP;
                let spatial = idct2(&coeffs);
                let mut clipped = [[0.0; BLOCK]; BLOCK];
                for i in 0..BLOCK {
                    for j in 0..BLOCK {
                        clipped[i][j] = clip_u8(spatial[i][j]) as f64;
                    }
                }
                set_block(&mut y, width, row, col, &clipped);
            }
        }
    }

    let watermarked = from_y_plane(&y, &cb, &cr, img.width, img.height);

    // Layer C: PNG text metadata.
    let payload_hex = hex::encode(&payload);
    let zw_text = encode_bits(&payload_bits);
    let png_bytes = encode_png(
        &watermarked,
        &[("WM_PAYLOAD", &payload_hex, false), ("Keywords", &zw_text, true)],
    );

    (
        png_bytes,
        ImageEmbedInfo {
            embedding_method: "dct_qim_metadata_triple_layer",
            alpha,
            width: img.width,
            height: img.height,
            blocks_processed,
        },
    )
}

#[derive(Debug, Clone)]
pub struct ImageVerifyResult {
    pub detected: bool,
    pub correlation: f64,
    pub confidence: f64,
    pub signature_valid: bool,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub timestamp_unix: Option<u32>,
    pub wm_id: Option<String>,
    pub source: Option<&'static str>,
}

fn try_metadata_layers(texts: &[(String, String)], key: &SecretKey) -> Option<(crate::payload::ParsedPayload, &'static str)> {
    if let Some((_, hex_val)) = texts.iter().find(|(k, _)| k == "WM_PAYLOAD") {
        if let Ok(raw) = hex::decode(hex_val) {
            if let Some(p) = parse_payload(&raw, key) {
                return Some((p, "metadata_wm_payload"));
            }
        }
    }
    if let Some((_, kw)) = texts.iter().find(|(k, _)| k == "Keywords") {
        let bits = decode_to_bits(kw);
        if bits.len() >= PAYLOAD_BITS {
            let raw = from_bits(&bits[..PAYLOAD_BITS]);
            if let Some(p) = parse_payload(&raw, key) {
                return Some((p, "metadata_keywords"));
            }
        }
    }
    None
}

fn dct_correlation(y: &[f64], width: usize, height: usize, mask: &[f64]) -> f64 {
    let nb_h = height / BLOCK;
    let nb_w = width / BLOCK;
    let mut extracted = Vec::with_capacity(nb_h * nb_w * 16);
    let mut mask_vals = Vec::with_capacity(nb_h * nb_w * 16);
    for br in 0..nb_h {
        for bc in 0..nb_w {
            let (row, col) = (br * BLOCK, bc * BLOCK);
            let block = get_block(y, width, row, col);
            let coeffs = dct2(&block);
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
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a.sqrt() < 1e-9 || var_b.sqrt() < 1e-9 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Crop/shift-tolerant tiled-QIM payload search (spec.md §4.4).
fn extract_qim_tiled_search(y: &[f64], width: usize, height: usize, tile_map: &[usize], key: &SecretKey) -> Option<crate::payload::ParsedPayload> {
    let h_search = height.min(512);
    let w_search = width.min(512);
    let (cy, cx) = (height / 2, width / 2);
    let r_start = cy.saturating_sub(h_search / 2);
    let c_start = cx.saturating_sub(w_search / 2);
    let crop_h = h_search.min(height - r_start);
    let crop_w = w_search.min(width - c_start);

    let mut shifts: Vec<(usize, usize)> = vec![(0, 0)];
    for dy in 0..8 {
        for dx in 0..8 {
            if dy != 0 || dx != 0 {
                shifts.push((dy, dx));
            }
        }
    }

    for (dy, dx) in shifts {
        if dy >= crop_h || dx >= crop_w {
            continue;
        }
        let nb_h = (crop_h - dy) / BLOCK;
        let nb_w = (crop_w - dx) / BLOCK;
        if nb_h < 1 || nb_w < 1 {
            continue;
        }
        let mut votes = vec![[0u32; 2]; TILE_ROWS * TILE_COLS];
        for br in 0..nb_h {
            for bc in 0..nb_w {
                let row = r_start + dy + br * BLOCK;
                let col = c_start + dx + bc * BLOCK;
                let block = get_block(y, width, row, col);
                let coeffs = dct2(&block);
                let q = round_half_away_from_zero(coeffs[U_QIM][V_QIM] / QIM_STEP) as i64;
                let bit = (q.unsigned_abs() % 2) as usize;
                votes[(br % TILE_ROWS) * TILE_COLS + (bc % TILE_COLS)][bit] += 1;
            }
        }

        for sy in 0..TILE_ROWS {
            for sx in 0..TILE_COLS {
                let voted_bits: Vec<u8> = (0..PAYLOAD_BITS)
                    .map(|bit_idx| {
                        let loc = tile_map[bit_idx];
                        let r = (loc / TILE_COLS + sy) % TILE_ROWS;
                        let c = (loc % TILE_COLS + sx) % TILE_COLS;
                        let v = votes[r * TILE_COLS + c];
                        if v[1] > v[0] { 1 } else { 0 }
                    })
                    .collect();
                let raw = from_bits(&voted_bits);
                if let Some(p) = parse_payload(&raw, key) {
                    return Some(p);
                }
            }
        }
    }
    None
}

pub fn verify(img: &RgbImage, texts: &[(String, String)], key: &SecretKey) -> ImageVerifyResult {
    let (width, height) = (img.width as usize, img.height as usize);
    let (y, _cb, _cr) = to_y_plane(img);

    let mut sig_valid = false;
    let mut model_name = None;
    let mut context = None;
    let mut ts_unix = None;
    let mut wm_id = None;
    let mut source = None;

    if let Some((parsed, src)) = try_metadata_layers(texts, key) {
        sig_valid = true;
        wm_id = derive_wm_id(parsed.model_name.as_deref(), Some(parsed.timestamp_unix), key);
        model_name = parsed.model_name;
        context = parsed.context;
        ts_unix = Some(parsed.timestamp_unix);
        source = Some(src);
    }

    let mask = make_dct_mask(key, height, width);
    let rho = dct_correlation(&y, width, height, &mask);
    let stat_detected = rho > RHO_THRESHOLD;
    let stat_conf = ((rho - RHO_THRESHOLD) / (1.0 - RHO_THRESHOLD).max(0.01)).clamp(0.0, 1.0);

    if !sig_valid {
        let tile_map = make_tile_map(key);
        if let Some(parsed) = extract_qim_tiled_search(&y, width, height, &tile_map, key) {
            sig_valid = true;
            wm_id = derive_wm_id(parsed.model_name.as_deref(), Some(parsed.timestamp_unix), key);
            model_name = parsed.model_name;
            context = parsed.context;
            ts_unix = Some(parsed.timestamp_unix);
            source = Some("qim_dct");
        }
    }

    let confidence = stat_conf.max(if sig_valid { 0.9 } else { 0.0 });
    let detected = stat_detected || sig_valid;

    ImageVerifyResult {
        detected,
        correlation: rho,
        confidence,
        signature_valid: sig_valid,
        model_name,
        context,
        timestamp_unix: ts_unix,
        wm_id,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_bytes(b"image-engine-key".to_vec())
    }

    fn gradient_image(size: u32) -> RgbImage {
        let mut rgb = Vec::with_capacity((size * size * 3) as usize);
        for r in 0..size {
            for c in 0..size {
                let v = (((r + c) * 255) / (2 * size.max(1))) as u8;
                rgb.push(v);
                rgb.push(v);
                rgb.push(255 - v);
            }
        }
        RgbImage { width: size, height: size, rgb }
    }

    #[test]
    fn ycbcr_round_trips_within_rounding() {
        for (r, g, b) in [(0u8, 0u8, 0u8), (255, 255, 255), (12, 200, 88)] {
            let (y, cb, cr) = rgb_to_ycbcr(r, g, b);
            let (r2, g2, b2) = ycbcr_to_rgb(y, cb, cr);
            assert!((r as i32 - r2 as i32).abs() <= 1);
            assert!((g as i32 - g2 as i32).abs() <= 1);
            assert!((b as i32 - b2 as i32).abs() <= 1);
        }
    }

    #[test]
    fn s3_embed_then_png_round_trip_verifies() {
        let k = key();
        let img = gradient_image(64);
        let (png_bytes, _info) = embed(&img, &k, 0.8, Some("claude-sonnet-4"), None, None);

        let (decoded, texts) = decode_png(&png_bytes).unwrap();
        assert_eq!(decoded.width, 64);
        let result = verify(&decoded, &texts, &k);
        assert!(result.signature_valid);
        assert!(matches!(result.source, Some("metadata_wm_payload") | Some("qim_dct")));
        assert_eq!(result.model_name.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn wrong_key_keeps_statistical_layer_but_not_signature() {
        let k = key();
        let other = SecretKey::from_bytes(b"other-key".to_vec());
        let img = gradient_image(64);
        let (png_bytes, _) = embed(&img, &k, 0.8, Some("m"), None, None);
        let (decoded, texts) = decode_png(&png_bytes).unwrap();
        let result = verify(&decoded, &texts, &other);
        assert!(!result.signature_valid);
    }
}
