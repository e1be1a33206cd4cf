//! G.711 μ-law companding.
//!
//! Telephony media streams carry 8 kHz mono audio where every sample is one
//! logarithmically compressed byte. This module converts between that byte
//! representation and 16-bit signed linear PCM.
//!
//! # Byte layout
//!
//! ```text
//!   bit  7     6 5 4       3 2 1 0
//!      [sign][exponent][  mantissa  ]   (transmitted inverted)
//! ```
//!
//! Encoding is lossy; decoding followed by encoding reproduces the original
//! byte for every code point except the redundant "negative zero" (`0x7F`),
//! which re-encodes as positive zero (`0xFF`).

/// Bias added to the magnitude before compression.
pub const MULAW_BIAS: i32 = 0x84;

/// Largest magnitude that survives compression; larger inputs are clamped.
pub const MULAW_CLIP: i32 = 32635;

/// Encoded value of a zero (silent) sample.
pub const MULAW_SILENCE: u8 = 0xFF;

const SIGN_BIT: u8 = 0x80;
const EXPONENT_SHIFT: u8 = 4;
const MANTISSA_MASK: i32 = 0x0F;

/// Find the exponent band for a biased magnitude.
///
/// The eight bands start at `0x80 << n`; the biased magnitude is always at
/// least `MULAW_BIAS`, so the shifted value is never zero.
#[inline]
fn exponent_band(biased: i32) -> u8 {
    let top = ((biased >> 7) & 0xFF) as u8;
    (7 - top.leading_zeros()) as u8
}

/// Compress one 16-bit linear sample into a μ-law byte.
#[inline]
pub fn encode(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        SIGN_BIT
    } else {
        0
    };

    let biased = magnitude.min(MULAW_CLIP) + MULAW_BIAS;
    let exponent = exponent_band(biased);
    let mantissa = ((biased >> (exponent + 3)) & MANTISSA_MASK) as u8;

    !(sign | (exponent << EXPONENT_SHIFT) | mantissa)
}

/// Expand one μ-law byte into a 16-bit linear sample.
#[inline]
pub fn decode(byte: u8) -> i16 {
    let code = !byte;
    let exponent = (code >> EXPONENT_SHIFT) & 0x07;
    let mantissa = i32::from(code) & MANTISSA_MASK;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    let sample = if code & SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    };

    // Largest reconstructable magnitude is 32124, so this never truncates.
    sample as i16
}

/// Compress a buffer of linear samples, preserving order and length.
pub fn encode_samples(samples: &[i16]) -> Vec<u8> {
    samples.iter().copied().map(encode).collect()
}

/// Expand a buffer of μ-law bytes, preserving order and length.
pub fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().copied().map(decode).collect()
}

/// Compress little-endian PCM16 bytes. A trailing odd byte is ignored.
pub fn encode_pcm16le(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| encode(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Expand μ-law bytes into little-endian PCM16 bytes.
pub fn decode_to_pcm16le(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.extend_from_slice(&decode(byte).to_le_bytes());
    }
    out
}
