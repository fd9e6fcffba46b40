//! Dwell tracking
//!
//! Dwell grows by one interval per consecutive sample on the same target
//! and drops to zero on any change. A target becomes the active context once
//! dwell reaches the threshold; it is announced once per change.

use std::collections::HashSet;
use std::time::Duration;

/// Active-context transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSignal {
    Changed(String),
    Cleared,
}

/// Per-target dwell state
#[derive(Debug, Clone)]
pub struct DwellTracker {
    interval: Duration,
    threshold: Duration,
    ignored: HashSet<String>,
    target: Option<String>,
    dwell: Duration,
    active: Option<String>,
}

impl DwellTracker {
    pub fn new(interval: Duration, threshold: Duration, ignored: impl IntoIterator<Item = String>) -> Self {
        Self {
            interval,
            threshold,
            ignored: ignored.into_iter().collect(),
            target: None,
            dwell: Duration::ZERO,
            active: None,
        }
    }

    /// Feed one sample; `None` is a miss
    pub fn observe(&mut self, hit: Option<&str>) -> Option<ContextSignal> {
        let Some(name) = hit else {
            self.target = None;
            self.dwell = Duration::ZERO;
            return self.active.take().map(|_| ContextSignal::Cleared);
        };

        if self.target.as_deref() == Some(name) {
            self.dwell += self.interval;
        } else {
            self.target = Some(name.to_string());
            self.dwell = Duration::ZERO;
        }

        if self.dwell >= self.threshold
            && self.active.as_deref() != Some(name)
            && !self.ignored.contains(name)
        {
            self.active = Some(name.to_string());
            return Some(ContextSignal::Changed(name.to_string()));
        }
        None
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    pub fn active_context(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker() -> DwellTracker {
        DwellTracker::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            vec!["Scene".to_string()],
        )
    }

    #[test]
    fn test_context_announced_once() {
        let mut tracker = tracker();
        assert_eq!(tracker.observe(Some("Gear")), None);
        assert_eq!(
            tracker.observe(Some("Gear")),
            Some(ContextSignal::Changed("Gear".into()))
        );
        assert_eq!(tracker.observe(Some("Gear")), None);
        assert_eq!(tracker.observe(Some("Gear")), None);
        assert_eq!(tracker.active_context(), Some("Gear"));
    }

    #[test]
    fn test_target_change_resets_dwell() {
        let mut tracker = tracker();
        tracker.observe(Some("Gear"));
        tracker.observe(Some("Gear"));
        tracker.observe(Some("Shaft"));
        assert_eq!(tracker.dwell(), Duration::ZERO);
        assert_eq!(
            tracker.observe(Some("Shaft")),
            Some(ContextSignal::Changed("Shaft".into()))
        );
    }

    #[test]
    fn test_miss_clears_context() {
        let mut tracker = tracker();
        tracker.observe(Some("Gear"));
        tracker.observe(Some("Gear"));
        assert_eq!(tracker.observe(None), Some(ContextSignal::Cleared));
        assert_eq!(tracker.observe(None), None);
        assert_eq!(tracker.active_context(), None);
    }

    #[test]
    fn test_ignored_targets_never_active() {
        let mut tracker = tracker();
        for _ in 0..5 {
            assert_eq!(tracker.observe(Some("Scene")), None);
        }
        assert_eq!(tracker.dwell(), Duration::from_secs(4));
    }

    proptest! {
        #[test]
        fn prop_dwell_counts_consecutive_hits(hits in proptest::collection::vec(proptest::option::of(0u8..3), 1..60)) {
            let mut tracker = tracker();
            let mut run = 0u64;
            let mut previous: Option<u8> = None;
            for hit in hits {
                let name = hit.map(|h| format!("part-{h}"));
                tracker.observe(name.as_deref());
                run = match (hit, previous) {
                    (Some(h), Some(p)) if h == p => run + 1,
                    _ => 0,
                };
                previous = hit;
                prop_assert_eq!(tracker.dwell(), Duration::from_secs(run));
            }
        }

        #[test]
        fn prop_changes_never_repeat(hits in proptest::collection::vec(proptest::option::of(0u8..3), 1..60)) {
            let mut tracker = tracker();
            let mut last_changed: Option<String> = None;
            for hit in hits {
                let name = hit.map(|h| format!("part-{h}"));
                match tracker.observe(name.as_deref()) {
                    Some(ContextSignal::Changed(target)) => {
                        prop_assert_ne!(Some(&target), last_changed.as_ref());
                        last_changed = Some(target);
                    }
                    Some(ContextSignal::Cleared) => last_changed = None,
                    None => {}
                }
            }
        }
    }
}
