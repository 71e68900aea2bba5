//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Audio engine: FFT mid-band statistical mark + 3-copy amplitude-invariant
//! magnitude QIM payload (spec.md §4.5, grounded on
//! `original_source/backend/watermarking/audio_watermark.py`).
//!
//! The QIM step is a fraction of the band's median magnitude rather than a
//! fixed value, so the payload layer survives amplitude normalization.

use std::collections::HashSet;
use std::io::Cursor;

use rand_core::RngCore;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::crypto::keyed_rng;
use crate::error::CodecError;
use crate::key::SecretKey;
use crate::payload::{build_payload, derive_wm_id, from_bits, parse_payload, to_bits, PAYLOAD_BITS};

const AUD_QIM_FRAC: f64 = 0.40;
const AUD_COPIES: usize = 3;
const DEFAULT_ALPHA: f64 = 0.008;
const DEFAULT_THRESHOLD: f64 = 0.08;

pub struct DecodedWav {
    pub mono: Vec<f64>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Full interleaved samples, used to reconstruct other channels on embed.
    pub all_channels: Vec<f64>,
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| CodecError::UnsupportedWav(e.to_string()))?;
    let spec = reader.spec();
    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i32>()
            .map(|s| s.unwrap_or(0) as f64)
            .collect(),
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0) as f64)
            .collect(),
    };
    let channels = spec.channels;
    let mono = if channels > 1 {
        samples.iter().step_by(channels as usize).copied().collect()
    } else {
        samples.clone()
    };
    Ok(DecodedWav {
        mono,
        sample_rate: spec.sample_rate,
        channels,
        bits_per_sample: spec.bits_per_sample,
        all_channels: samples,
    })
}

fn encode_wav(all_channels: &[f64], wav: &DecodedWav) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: wav.channels,
        sample_rate: wav.sample_rate,
        bits_per_sample: wav.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).expect("valid wav spec");
        let max_v = (1i64 << (wav.bits_per_sample - 1)) as f64 - 1.0;
        let min_v = -(1i64 << (wav.bits_per_sample - 1)) as f64;
        for &s in all_channels {
            writer.write_sample(s.clamp(min_v, max_v) as i32).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    buf
}

fn rfft(samples: &[f64]) -> Vec<Complex64> {
    let n = samples.len();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex64> = samples.iter().map(|&s| Complex64::new(s, 0.0)).collect();
    fft.process(&mut buf);
    buf.truncate(n / 2 + 1);
    buf
}

fn irfft(spectrum: &[Complex64], n: usize) -> Vec<f64> {
    let m = spectrum.len();
    let mut full = vec![Complex64::new(0.0, 0.0); n];
    full[..m].copy_from_slice(spectrum);
    for k in m..n {
        full[k] = full[n - k].conj();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_inverse(n);
    fft.process(&mut full);
    full.iter().map(|c| c.re / n as f64).collect()
}

fn watermark_band(n_freqs: usize) -> (usize, usize) {
    (n_freqs / 8, n_freqs / 4)
}

fn make_freq_mask(key: &SecretKey, size: usize) -> Vec<f64> {
    let mut rng = keyed_rng(key, b"audio_fft");
    (0..size).map(|_| if rng.next_u32() & 1 == 0 { -1.0 } else { 1.0 }).collect()
}

fn qim_band(copy_idx: usize, n_freqs: usize) -> (usize, usize) {
    let slice_size = (n_freqs / 6).max(1);
    let f_lo = (2 * copy_idx + 1) * slice_size;
    let f_hi = f_lo + slice_size;
    (f_lo, f_hi.min(n_freqs.saturating_sub(1)))
}

fn qim_positions(key: &SecretKey, n_freqs: usize, copy_idx: usize) -> Vec<usize> {
    let (f_lo, f_hi) = qim_band(copy_idx, n_freqs);
    let band_size = f_hi.saturating_sub(f_lo);
    let mut tag = b"aud_qim".to_vec();
    tag.push(copy_idx as u8);
    let mut rng = keyed_rng(key, &tag);

    if band_size < PAYLOAD_BITS {
        return (0..PAYLOAD_BITS)
            .map(|_| f_lo + (rng.next_u32() as usize) % (f_hi.max(f_lo + 1) - f_lo))
            .collect();
    }
    let mut seen = HashSet::with_capacity(PAYLOAD_BITS);
    let mut result = Vec::with_capacity(PAYLOAD_BITS);
    while result.len() < PAYLOAD_BITS {
        let f = f_lo + (rng.next_u32() as usize) % band_size;
        if seen.insert(f) {
            result.push(f);
        }
    }
    result
}

fn band_qim_step(spectrum: &[Complex64], copy_idx: usize, n_freqs: usize) -> f64 {
    let (f_lo, f_hi) = qim_band(copy_idx, n_freqs);
    let mut mags: Vec<f64> = spectrum[f_lo..f_hi].iter().map(|c| c.norm()).collect();
    mags.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let med = if mags.is_empty() {
        0.0
    } else if mags.len() % 2 == 1 {
        mags[mags.len() / 2]
    } else {
        (mags[mags.len() / 2 - 1] + mags[mags.len() / 2]) / 2.0
    };
    (med * AUD_QIM_FRAC).max(1.0)
}

fn embed_qim(spectrum: &mut [Complex64], bits: &[u8], positions: &[usize], step: f64) {
    for (i, &f) in positions.iter().enumerate() {
        if i >= bits.len() {
            break;
        }
        let mag = spectrum[f].norm();
        let phase = spectrum[f].arg();
        let mut q = (mag / step).round() as i64;
        if (q.rem_euclid(2)) as u8 != bits[i] {
            q = if bits[i] == 1 { q + 1 } else { (q - 1).max(0) };
        }
        spectrum[f] = Complex64::from_polar(q as f64 * step, phase);
    }
}

fn extract_qim(spectrum: &[Complex64], positions: &[usize], step: f64) -> Vec<u8> {
    positions
        .iter()
        .map(|&f| ((spectrum[f].norm() / step).round() as i64).rem_euclid(2) as u8)
        .collect()
}

pub struct AudioEmbedInfo {
    pub embedding_method: &'static str,
    pub alpha: f64,
    pub sample_rate_hz: u32,
    pub n_samples: usize,
    pub qim_copies: usize,
}

#[allow(clippy::needless_range_loop)]
pub fn embed(
    wav_bytes: &[u8],
    key: &SecretKey,
    alpha: Option<f64>,
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    context: Option<&str>,
) -> Result<(Vec<u8>, AudioEmbedInfo), CodecError> {
    let alpha = alpha.unwrap_or(DEFAULT_ALPHA);
    let wav = decode_wav(wav_bytes)?;
    let n = wav.mono.len();

    let mut spectrum = rfft(&wav.mono);
    let n_freqs = spectrum.len();
    let (f_lo, f_hi) = watermark_band(n_freqs);
    let mask = make_freq_mask(key, f_hi - f_lo);
    let a_max = wav.mono.iter().fold(0.0f64, |m, &v| m.max(v.abs())).max(1.0);

    for (i, idx) in (f_lo..f_hi).enumerate() {
        spectrum[idx] += Complex64::new(alpha * a_max * mask[i], 0.0);
    }

    let payload = build_payload(model_name, timestamp_iso, key, context);
    let payload_bits = to_bits(&payload);
    let steps: Vec<f64> = (0..AUD_COPIES).map(|c| band_qim_step(&spectrum, c, n_freqs)).collect();
    for c in 0..AUD_COPIES {
        let positions = qim_positions(key, n_freqs, c);
        embed_qim(&mut spectrum, &payload_bits, &positions, steps[c]);
    }

    let mono_w = irfft(&spectrum, n);
    let mut all = wav.all_channels.clone();
    if wav.channels > 1 {
        for (i, v) in mono_w.iter().enumerate() {
            all[i * wav.channels as usize] = *v;
        }
    } else {
        all = mono_w;
    }
    let out_bytes = encode_wav(&all, &wav);

    Ok((
        out_bytes,
        AudioEmbedInfo {
            embedding_method: "fft_qim_dual_layer",
            alpha,
            sample_rate_hz: wav.sample_rate,
            n_samples: n,
            qim_copies: AUD_COPIES,
        },
    ))
}

#[derive(Debug, Clone)]
pub struct AudioVerifyResult {
    pub detected: bool,
    pub correlation: f64,
    pub confidence: f64,
    pub signature_valid: bool,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub timestamp_unix: Option<u32>,
    pub wm_id: Option<String>,
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
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

pub fn verify(wav_bytes: &[u8], key: &SecretKey, threshold: Option<f64>) -> Result<AudioVerifyResult, CodecError> {
    let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
    let wav = decode_wav(wav_bytes)?;
    let spectrum = rfft(&wav.mono);
    let n_freqs = spectrum.len();
    let (f_lo, f_hi) = watermark_band(n_freqs);
    let mask = make_freq_mask(key, f_hi - f_lo);
    let band_re: Vec<f64> = spectrum[f_lo..f_hi].iter().map(|c| c.re).collect();
    let rho = pearson(&band_re, &mask);

    let stat_detected = rho.abs() > threshold;
    let stat_conf = ((rho.abs() - threshold) / (0.5 - threshold).max(0.01)).clamp(0.0, 1.0);

    let mut copy_bits = Vec::with_capacity(AUD_COPIES);
    for c in 0..AUD_COPIES {
        let positions = qim_positions(key, n_freqs, c);
        let step = band_qim_step(&spectrum, c, n_freqs);
        copy_bits.push(extract_qim(&spectrum, &positions, step));
    }

    let voted: Vec<u8> = (0..PAYLOAD_BITS)
        .map(|i| {
            let ones: usize = copy_bits.iter().filter(|cb| cb[i] == 1).count();
            if ones * 2 > copy_bits.len() { 1 } else { 0 }
        })
        .collect();
    let raw = from_bits(&voted);
    let parsed = parse_payload(&raw, key);

    let sig_valid = parsed.is_some();
    let (model_name, context, ts_unix, wm_id) = match &parsed {
        Some(p) => (
            p.model_name.clone(),
            p.context.clone(),
            Some(p.timestamp_unix),
            derive_wm_id(p.model_name.as_deref(), Some(p.timestamp_unix), key),
        ),
        None => (None, None, None, None),
    };

    Ok(AudioVerifyResult {
        detected: stat_detected || sig_valid,
        correlation: rho,
        confidence: stat_conf.max(if sig_valid { 0.9 } else { 0.0 }),
        signature_valid: sig_valid,
        model_name,
        context,
        timestamp_unix: ts_unix,
        wm_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_bytes(b"audio-engine-key".to_vec())
    }

    fn tone_wav(n: usize, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
            for i in 0..n {
                let t = i as f64 / sample_rate as f64;
                let v = (8000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i32;
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf
    }

    #[test]
    fn s4_embed_then_verify_recovers_payload() {
        let k = key();
        let wav = tone_wav(16_384, 16_000);
        let (wm_wav, info) = embed(&wav, &k, None, Some("claude-sonnet-4"), None, None).unwrap();
        assert_eq!(info.qim_copies, AUD_COPIES);
        let result = verify(&wm_wav, &k, None).unwrap();
        assert!(result.signature_valid, "{:?}", result);
        assert_eq!(result.model_name.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn wrong_key_fails_signature() {
        let k = key();
        let other = SecretKey::from_bytes(b"other".to_vec());
        let wav = tone_wav(16_384, 16_000);
        let (wm_wav, _) = embed(&wav, &k, None, Some("m"), None, None).unwrap();
        let result = verify(&wm_wav, &other, None).unwrap();
        assert!(!result.signature_valid);
    }
}
