//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! Orthonormal 8×8 2-D DCT-II/III (spec.md Glossary), shared by the image
//! and video statistical/QIM layers.

use std::f64::consts::PI;

pub const BLOCK: usize = 8;

fn alpha(u: usize) -> f64 {
    if u == 0 {
        (1.0 / BLOCK as f64).sqrt()
    } else {
        (2.0 / BLOCK as f64).sqrt()
    }
}

/// Precomputed cosine table: `cos_table[x][u] = cos((2x+1)u*pi/16)`.
fn cosine_table() -> [[f64; BLOCK]; BLOCK] {
    let mut table = [[0.0; BLOCK]; BLOCK];
    for (x, row) in table.iter_mut().enumerate() {
        for (u, cell) in row.iter_mut().enumerate() {
            *cell = ((2 * x + 1) as f64 * u as f64 * PI / (2.0 * BLOCK as f64)).cos();
        }
    }
    table
}

/// Forward 2-D DCT-II, orthonormal, on an 8×8 block of `f64` samples.
pub fn dct2(block: &[[f64; BLOCK]; BLOCK]) -> [[f64; BLOCK]; BLOCK] {
    let cos = cosine_table();
    let mut out = [[0.0; BLOCK]; BLOCK];
    for u in 0..BLOCK {
        for v in 0..BLOCK {
            let mut sum = 0.0;
            for x in 0..BLOCK {
                for y in 0..BLOCK {
                    sum += block[x][y] * cos[x][u] * cos[y][v];
                }
            }
            out[u][v] = alpha(u) * alpha(v) * sum;
        }
    }
    out
}

/// Inverse 2-D DCT-III, orthonormal — exact inverse of [`dct2`].
pub fn idct2(coeffs: &[[f64; BLOCK]; BLOCK]) -> [[f64; BLOCK]; BLOCK] {
    let cos = cosine_table();
    let mut out = [[0.0; BLOCK]; BLOCK];
    for x in 0..BLOCK {
        for y in 0..BLOCK {
            let mut sum = 0.0;
            for u in 0..BLOCK {
                for v in 0..BLOCK {
                    sum += alpha(u) * alpha(v) * coeffs[u][v] * cos[x][u] * cos[y][v];
                }
            }
            out[x][y] = sum;
        }
    }
    out
}

/// Round-to-nearest, halves away from zero (banker-free), per spec.md §9.
pub fn round_half_away_from_zero(x: f64) -> f64 {
    if x >= 0.0 {
        (x + 0.5).floor()
    } else {
        (x - 0.5).ceil()
    }
}

/// Saturating clip of a float sample into `[0, 255]` for pixel output.
pub fn clip_u8(x: f64) -> u8 {
    if x.is_nan() {
        0
    } else {
        x.round().clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> [[f64; BLOCK]; BLOCK] {
        let mut b = [[0.0; BLOCK]; BLOCK];
        for (i, row) in b.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = ((i * 37 + j * 11) % 256) as f64;
            }
        }
        b
    }

    #[test]
    fn dct_idct_round_trips() {
        let block = sample_block();
        let coeffs = dct2(&block);
        let back = idct2(&coeffs);
        for i in 0..BLOCK {
            for j in 0..BLOCK {
                assert!((back[i][j] - block[i][j]).abs() < 1e-6, "{} vs {}", back[i][j], block[i][j]);
            }
        }
    }

    #[test]
    fn round_half_away_from_zero_behaves() {
        assert_eq!(round_half_away_from_zero(2.5), 3.0);
        assert_eq!(round_half_away_from_zero(-2.5), -3.0);
        assert_eq!(round_half_away_from_zero(2.4), 2.0);
    }

    #[test]
    fn clip_u8_saturates() {
        assert_eq!(clip_u8(-10.0), 0);
        assert_eq!(clip_u8(300.0), 255);
        assert_eq!(clip_u8(128.4), 128);
    }
}
