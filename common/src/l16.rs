//! L16 payload codec (RFC 3551): 16-bit signed big-endian PCM.

use crate::sample::Sample;

/// Bytes per L16 sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encodes float samples into L16 wire bytes.
pub fn encode(samples: &[Sample], out: &mut Vec<u8>) {
    // ---
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Number of samples encoded in an L16 payload.
pub fn sample_count(payload: &[u8]) -> usize {
    // ---
    payload.len() / BYTES_PER_SAMPLE
}

/// Decodes a range of an L16 payload into float samples.
///
/// `offset` and `out.len()` are in samples. Returns the number of
/// samples written (short when the payload ends first).
pub fn decode(payload: &[u8], offset: usize, out: &mut [Sample]) -> usize {
    // ---
    let available = sample_count(payload).saturating_sub(offset);
    let n = available.min(out.len());

    for (i, slot) in out.iter_mut().take(n).enumerate() {
        let at = (offset + i) * BYTES_PER_SAMPLE;
        let value = i16::from_be_bytes([payload[at], payload[at + 1]]);
        *slot = value as Sample / i16::MAX as Sample;
    }

    n
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        // ---
        let samples = [0.0f32, 0.5, -0.5, 1.0, -1.0];
        let mut wire = Vec::new();
        encode(&samples, &mut wire);
        assert_eq!(wire.len(), samples.len() * BYTES_PER_SAMPLE);

        let mut out = [0.0f32; 5];
        let n = decode(&wire, 0, &mut out);
        assert_eq!(n, 5);

        for (a, b) in samples.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1.0 / 16384.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_decode_with_offset() {
        // ---
        let samples = [0.1f32, 0.2, 0.3, 0.4];
        let mut wire = Vec::new();
        encode(&samples, &mut wire);

        let mut out = [0.0f32; 2];
        let n = decode(&wire, 2, &mut out);
        assert_eq!(n, 2);
        assert!((out[0] - 0.3).abs() < 0.001);
        assert!((out[1] - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_decode_past_end() {
        // ---
        let wire = [0u8; 8]; // 4 samples
        let mut out = [1.0f32; 8];
        let n = decode(&wire, 2, &mut out);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_encode_clamps_overrange() {
        // ---
        let mut wire = Vec::new();
        encode(&[2.0, -2.0], &mut wire);

        let mut out = [0.0f32; 2];
        decode(&wire, 0, &mut out);
        assert!((out[0] - 1.0).abs() < 0.001);
        assert!((out[1] + 1.0).abs() < 0.001);
    }
}
