//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! The zero-width invisible Unicode alphabet (spec.md §3/§6): a 2-bit
//! channel used by the text, image `Keywords` chunk, and PDF layers.
//!
//! `(0,0) -> U+200B`, `(0,1) -> U+200C`, `(1,0) -> U+200D`, `(1,1) -> U+2060`.
//! No other invisible code point is produced or accepted.

pub const ZWSP: char = '\u{200B}';
pub const ZWNJ: char = '\u{200C}';
pub const ZWJ: char = '\u{200D}';
pub const WJ: char = '\u{2060}';

fn bits_to_char(b0: u8, b1: u8) -> char {
    match (b0, b1) {
        (0, 0) => ZWSP,
        (0, 1) => ZWNJ,
        (1, 0) => ZWJ,
        _ => WJ,
    }
}

fn char_to_bits(c: char) -> Option<(u8, u8)> {
    match c {
        ZWSP => Some((0, 0)),
        ZWNJ => Some((0, 1)),
        ZWJ => Some((1, 0)),
        WJ => Some((1, 1)),
        _ => None,
    }
}

pub fn is_zw_char(c: char) -> bool {
    char_to_bits(c).is_some()
}

/// Encode a bit sequence (MSB-first byte order assumed by caller) into ZW
/// code points, 2 bits per code point. Odd-length bit sequences are padded
/// with a trailing zero bit.
pub fn encode_bits(bits: &[u8]) -> String {
    let mut out = String::with_capacity(bits.len().div_ceil(2));
    let mut iter = bits.chunks(2);
    for pair in &mut iter {
        let b0 = pair[0];
        let b1 = *pair.get(1).unwrap_or(&0);
        out.push(bits_to_char(b0, b1));
    }
    out
}

/// Decode a run of ZW code points back into bits. Non-ZW characters are
/// ignored by the caller before this is invoked.
pub fn decode_to_bits(s: &str) -> Vec<u8> {
    let mut bits = Vec::with_capacity(s.chars().count() * 2);
    for c in s.chars() {
        if let Some((b0, b1)) = char_to_bits(c) {
            bits.push(b0);
            bits.push(b1);
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bits() {
        let bits = vec![1, 0, 1, 1, 0, 0, 1, 0, 1];
        let encoded = encode_bits(&bits);
        let decoded = decode_to_bits(&encoded);
        assert_eq!(&decoded[..bits.len()], &bits[..]);
    }

    #[test]
    fn only_the_four_code_points_are_recognized() {
        assert!(is_zw_char(ZWSP) && is_zw_char(ZWNJ) && is_zw_char(ZWJ) && is_zw_char(WJ));
        assert!(!is_zw_char('\u{FEFF}'));
        assert!(!is_zw_char('a'));
    }
}
