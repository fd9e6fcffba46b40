//! Flush-bounded sample buffer
//!
//! The buffer is flushed whole when it holds `max_samples` or when
//! `max_age` has passed since the last flush (or creation) and it is not
//! empty. Taking a batch swaps in an empty buffer, so samples recorded while
//! an upload is in flight land in the next batch.

use std::mem;
use std::time::{Duration, Instant};

use crate::TelemetrySample;

/// Flush bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_samples: usize,
    pub max_age: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_samples: 10,
            max_age: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct TelemetryBuffer {
    samples: Vec<TelemetrySample>,
    policy: FlushPolicy,
    last_flush: Instant,
}

impl TelemetryBuffer {
    pub fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            samples: Vec::with_capacity(policy.max_samples),
            policy,
            last_flush: now,
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push(sample);
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        self.samples.len() >= self.policy.max_samples
            || now.saturating_duration_since(self.last_flush) >= self.policy.max_age
    }

    /// Swap out everything buffered; `None` when empty
    pub fn take(&mut self, now: Instant) -> Option<Vec<TelemetrySample>> {
        if self.samples.is_empty() {
            return None;
        }
        self.last_flush = now;
        let capacity = self.policy.max_samples;
        Some(mem::replace(&mut self.samples, Vec::with_capacity(capacity)))
    }

    /// Take a batch if a bound has been reached
    pub fn poll_flush(&mut self, now: Instant) -> Option<Vec<TelemetrySample>> {
        if self.should_flush(now) {
            self.take(now)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{UserId, Vec3};
    use proptest::prelude::*;

    fn sample(i: usize) -> TelemetrySample {
        TelemetrySample {
            user_id: UserId::anonymous(),
            context_id: "free-view".into(),
            model_id: None,
            target_name: format!("part-{i}"),
            local_hit_point: Vec3::ZERO,
            dwell_millis: 1000,
        }
    }

    #[test]
    fn test_count_then_age_flush() {
        let start = Instant::now();
        let mut buffer = TelemetryBuffer::new(FlushPolicy::default(), start);
        let mut batches = Vec::new();
        let mut flushed_at = start;

        // 12 samples within 3 s
        for i in 0..12 {
            let now = start + Duration::from_millis(250 * i as u64);
            buffer.push(sample(i));
            if let Some(batch) = buffer.poll_flush(now) {
                flushed_at = now;
                batches.push(batch);
            }
        }
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(buffer.len(), 2);

        assert!(buffer
            .poll_flush(flushed_at + Duration::from_millis(9_999))
            .is_none());
        let rest = buffer.poll_flush(flushed_at + Duration::from_secs(10)).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_buffer_never_flushes() {
        let start = Instant::now();
        let mut buffer = TelemetryBuffer::new(FlushPolicy::default(), start);
        assert!(buffer.poll_flush(start + Duration::from_secs(60)).is_none());
        assert_eq!(buffer.last_flush(), start);
    }

    #[test]
    fn test_age_measured_from_creation() {
        let start = Instant::now();
        let mut buffer = TelemetryBuffer::new(FlushPolicy::default(), start);
        buffer.push(sample(0));
        assert!(!buffer.should_flush(start + Duration::from_secs(9)));
        assert!(buffer.should_flush(start + Duration::from_secs(10)));
    }

    proptest! {
        #[test]
        fn prop_buffer_stays_bounded(gaps in proptest::collection::vec(0u64..3_000, 1..200)) {
            let start = Instant::now();
            let policy = FlushPolicy::default();
            let mut buffer = TelemetryBuffer::new(policy, start);
            let mut now = start;
            let mut total = 0usize;
            let mut flushed = 0usize;

            for (i, gap) in gaps.iter().enumerate() {
                now += Duration::from_millis(*gap);
                buffer.push(sample(i));
                total += 1;
                if let Some(batch) = buffer.poll_flush(now) {
                    prop_assert!(batch.len() <= policy.max_samples);
                    flushed += batch.len();
                }
                prop_assert!(buffer.len() < policy.max_samples);
                prop_assert!(now.duration_since(buffer.last_flush()) < policy.max_age || buffer.is_empty());
            }
            prop_assert_eq!(flushed + buffer.len(), total);
        }
    }
}
