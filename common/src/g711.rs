//! G.711 μ-law (PCMU) companding.
//!
//! Encodes 16-bit linear PCM to 8-bit μ-law and back, following the
//! segment/mantissa algorithm of the ITU-T G.711 reference code.
//! Both directions are pure, sample-at-a-time functions.

/// Bias added to the magnitude before segment lookup
const BIAS: i32 = 0x84;

/// Largest magnitude representable before clipping
const CLIP: i32 = 32635;

/// μ-law byte for digital silence
pub const ULAW_SILENCE: u8 = 0xFF;

/// Encodes one 16-bit linear sample to an 8-bit μ-law code.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    // ---
    let sample = sample as i32;
    let (sign, magnitude) = if sample < 0 {
        (0x80u8, -sample)
    } else {
        (0x00u8, sample)
    };

    let biased = magnitude.min(CLIP) + BIAS;

    // Segment is the position of the highest set bit among bits 14..7.
    let mut exponent: u8 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && biased & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((biased >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Expands an 8-bit μ-law code back to a 16-bit linear sample.
///
/// Reconstructs the midpoint of the quantization step, so the error for
/// an unclipped input is at most half a step (see [`quantization_step`]).
pub fn ulaw_to_linear(code: u8) -> i16 {
    // ---
    let code = !code;
    let negative = code & 0x80 != 0;
    let exponent = ((code >> 4) & 0x07) as u32;
    let mantissa = (code & 0x0F) as i32;

    let biased = ((mantissa | 0x10) << (exponent + 3)) + (1 << (exponent + 2));
    let magnitude = biased - BIAS;

    if negative {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Width of the quantization step for the segment a μ-law code falls in.
pub fn quantization_step(code: u8) -> i32 {
    // ---
    let exponent = ((!code >> 4) & 0x07) as u32;
    1 << (exponent + 3)
}

/// Encodes a slice of linear samples.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    // ---
    samples.iter().map(|&s| linear_to_ulaw(s)).collect()
}

/// Decodes a slice of μ-law codes.
pub fn decode(codes: &[u8]) -> Vec<i16> {
    // ---
    codes.iter().map(|&c| ulaw_to_linear(c)).collect()
}
