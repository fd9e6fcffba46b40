//! Capture framing

use cohort_wire::{RealtimeInput, INPUT_SAMPLE_RATE};

/// Samples per outbound frame
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Cuts a microphone sample stream into fixed-size realtime frames
#[derive(Debug)]
pub struct CaptureFramer {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl CaptureFramer {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples, returning every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<RealtimeInput> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                frames.push(RealtimeInput::from_samples(&self.pending, self.sample_rate));
                self.pending.clear();
            }
        }

        frames
    }

    /// Samples held back waiting for a full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop the partial frame
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for CaptureFramer {
    fn default() -> Self {
        Self::new(CAPTURE_FRAME_SIZE, INPUT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_wire::{decode_base64, pcm16_to_f32};

    #[test]
    fn test_frames_are_exact() {
        let mut framer = CaptureFramer::default();
        assert!(framer.push(&vec![0.1; 4000]).is_empty());
        assert_eq!(framer.pending(), 4000);

        let frames = framer.push(&vec![0.1; 4096 * 2]);
        assert_eq!(frames.len(), 2);
        assert_eq!(framer.pending(), 4000);

        let bytes = decode_base64(&frames[0].media.data).unwrap();
        assert_eq!(pcm16_to_f32(&bytes).unwrap().len(), CAPTURE_FRAME_SIZE);
        assert_eq!(frames[0].media.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_at_most_one_partial_frame() {
        let mut framer = CaptureFramer::new(8, 16_000);
        for len in [3usize, 17, 1, 40, 7] {
            framer.push(&vec![0.0; len]);
            assert!(framer.pending() < 8);
        }
        framer.clear();
        assert_eq!(framer.pending(), 0);
    }
}
