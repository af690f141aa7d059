//! G.711 μ-law companding.

const BIAS: i32 = 33;
const CLIP: i32 = 0x1FFF;
const EXPONENT_PROBE: i32 = 0x4000;

/// Compand one 16-bit linear sample into a μ-law byte.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };

    let biased = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = EXPONENT_PROBE;
    while biased & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (biased >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Expand a μ-law byte back to a linear sample.
///
/// Codes with exponent 1..=7 decode to the middle of their quantisation step,
/// on the same 13-bit scale the encoder clips to. The encoder stops probing at
/// exponent 0 without testing bit 7, so biased magnitudes 128..=255 wrap onto
/// the low codes; those codes decode to the 0..=94 range only.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let code = !byte as i32;
    let exponent = (code >> 4) & 0x07;
    let mantissa = code & 0x0F;

    let biased = if exponent == 0 {
        (mantissa << 3) | 0x04
    } else {
        (1 << (exponent + 7)) | (mantissa << (exponent + 3)) | (1 << (exponent + 2))
    };
    let magnitude = (biased - BIAS).max(0);

    if code & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compand a whole buffer.
pub fn encode_ulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_ulaw(s)).collect()
}
