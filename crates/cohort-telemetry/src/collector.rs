//! Gaze collector
//!
//! Sans-IO: the session loop calls [`GazeCollector::sample`] on its
//! telemetry interval with the current gaze hit and ships any batch it gets
//! back to a [`crate::TelemetrySink`].

use std::time::{Duration, Instant};

use cohort_core::{GazeHit, UserId};

use crate::{ContextSignal, DwellTracker, FlushPolicy, TelemetryBuffer, TelemetrySample};

/// Telemetry sampling interval
pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub dwell_threshold: Duration,
    /// Hit targets that are sampled but never become the active context
    pub ignored_targets: Vec<String>,
    pub flush: FlushPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: TELEMETRY_INTERVAL,
            dwell_threshold: Duration::from_secs(1),
            ignored_targets: vec!["Scene".to_string()],
            flush: FlushPolicy::default(),
        }
    }
}

/// Who and what the samples are about
#[derive(Debug, Clone, PartialEq)]
pub struct SampleScope {
    pub user_id: UserId,
    pub context_id: String,
    pub model_id: Option<String>,
}

impl Default for SampleScope {
    fn default() -> Self {
        Self {
            user_id: UserId::anonymous(),
            context_id: "free-view".to_string(),
            model_id: None,
        }
    }
}

/// Result of one sampling step
#[derive(Debug, Default)]
pub struct SampleOutcome {
    pub signal: Option<ContextSignal>,
    pub batch: Option<Vec<TelemetrySample>>,
}

/// Collector statistics
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    pub ticks: u64,
    pub hits: u64,
    pub batches: u64,
}

#[derive(Debug)]
pub struct GazeCollector {
    scope: SampleScope,
    interval: Duration,
    dwell: DwellTracker,
    buffer: TelemetryBuffer,
    stats: CollectorStats,
}

impl GazeCollector {
    /// The flush timer starts at `now`
    pub fn new(scope: SampleScope, config: CollectorConfig, now: Instant) -> Self {
        Self {
            scope,
            interval: config.interval,
            dwell: DwellTracker::new(config.interval, config.dwell_threshold, config.ignored_targets),
            buffer: TelemetryBuffer::new(config.flush, now),
            stats: CollectorStats::default(),
        }
    }

    /// One telemetry tick
    pub fn sample(&mut self, hit: Option<GazeHit>, now: Instant) -> SampleOutcome {
        self.stats.ticks += 1;
        let signal = self.dwell.observe(hit.as_ref().map(|h| h.target.as_str()));

        if let Some(hit) = hit {
            self.stats.hits += 1;
            self.buffer.push(TelemetrySample {
                user_id: self.scope.user_id.clone(),
                context_id: self.scope.context_id.clone(),
                model_id: self.scope.model_id.clone(),
                target_name: hit.target,
                local_hit_point: hit.local_point,
                dwell_millis: self.interval.as_millis() as u64,
            });
        }

        if let Some(ContextSignal::Changed(target)) = &signal {
            tracing::debug!(target: "telemetry", %target, "active context changed");
        }

        let batch = self.buffer.poll_flush(now);
        if batch.is_some() {
            self.stats.batches += 1;
        }
        SampleOutcome { signal, batch }
    }

    /// Final flush on teardown
    pub fn finish(&mut self, now: Instant) -> Option<Vec<TelemetrySample>> {
        let batch = self.buffer.take(now);
        if batch.is_some() {
            self.stats.batches += 1;
        }
        batch
    }

    pub fn active_context(&self) -> Option<&str> {
        self.dwell.active_context()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }
}
