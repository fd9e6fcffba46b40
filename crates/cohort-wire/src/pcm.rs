//! PCM16 audio codec
//!
//! Audio travels as little-endian signed 16-bit mono PCM, base64 encoded.
//! Capture runs at 16 kHz towards the mentor service; responses arrive at
//! 24 kHz.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use cohort_core::{CohortError, CohortResult};

/// Outbound capture rate
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Inbound response rate
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM16_SCALE: f32 = 32768.0;

/// MIME type announced for raw PCM at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert float samples in [-1, 1] to PCM16 LE bytes
///
/// Out-of-range input saturates instead of wrapping.
pub fn f32_to_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * PCM16_SCALE).round();
        let clamped = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        buf.put_i16_le(clamped);
    }
    buf.freeze()
}

/// Convert PCM16 LE bytes to float samples
pub fn pcm16_to_f32(bytes: &[u8]) -> CohortResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(CohortError::InvalidAudio(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(data: &str) -> CohortResult<Bytes> {
    BASE64
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|e| CohortError::DecodeError(format!("base64: {e}")))
}

/// Encode a capture frame for the wire
pub fn encode_pcm_chunk(samples: &[f32]) -> String {
    encode_base64(&f32_to_pcm16(samples))
}

/// Decoded mono audio ready for scheduling
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> CohortResult<Self> {
        if sample_rate == 0 {
            return Err(CohortError::InvalidAudio("sample rate is zero".into()));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Decode a base64 PCM16 chunk
    pub fn decode(data: &str, sample_rate: u32) -> CohortResult<Self> {
        let bytes = decode_base64(data)?;
        Self::new(pcm16_to_f32(&bytes)?, sample_rate)
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_scale_saturates() {
        let bytes = f32_to_pcm16(&[1.0, -1.0, 2.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_odd_payload_rejected() {
        assert!(matches!(
            pcm16_to_f32(&[0, 1, 2]),
            Err(CohortError::InvalidAudio(_))
        ));
    }

    #[test]
    fn test_bad_base64_rejected() {
        assert!(matches!(
            PcmBuffer::decode("not base64!", OUTPUT_SAMPLE_RATE),
            Err(CohortError::DecodeError(_))
        ));
    }

    #[test]
    fn test_duration_from_sample_count() {
        let chunk = encode_pcm_chunk(&vec![0.0; 4800]);
        let buffer = PcmBuffer::decode(&chunk, OUTPUT_SAMPLE_RATE).unwrap();
        assert_eq!(buffer.len(), 4800);
        assert!((buffer.duration() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(pcm_mime_type(INPUT_SAMPLE_RATE), "audio/pcm;rate=16000");
    }

    proptest! {
        #[test]
        fn prop_quantization_error_is_bounded(samples in proptest::collection::vec(-1.0f32..1.0, 0..256)) {
            let decoded = pcm16_to_f32(&f32_to_pcm16(&samples)).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (a, b) in samples.iter().zip(decoded.iter()) {
                prop_assert!((a - b).abs() <= 1.0 / 32768.0 + f32::EPSILON);
            }
        }
    }
}
