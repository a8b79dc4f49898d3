//! G.711 µ-law companding.
//!
//! Telephony providers stream 8 kHz µ-law; the pipeline works on PCM16.
//! Decoding then re-encoding reproduces every code except `0x7F`
//! (negative zero), which encodes back as `0xFF`.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compresses one PCM16 sample to a µ-law byte.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Expands one µ-law byte to a PCM16 sample.
pub fn ulaw_to_linear(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = (code >> 4) & 0x07;
    let mantissa = i32::from(code & 0x0F);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Expands a µ-law payload into PCM16LE bytes.
pub fn decode_ulaw(payload: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(payload.len() * 2);
    for &code in payload {
        pcm.extend_from_slice(&ulaw_to_linear(code).to_le_bytes());
    }
    pcm
}

/// Compresses PCM16LE bytes into a µ-law payload.
pub fn encode_ulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| linear_to_ulaw(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}
