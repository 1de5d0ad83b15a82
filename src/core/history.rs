//! Bounded, time-ordered sample history
//!
//! Implements the retention model shared by the raw, smoothed and distance series:
//! - append = push to the back, then prune by age and by count
//! - tail = samples newer than `now - retention`, capped to the newest `max_count`

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::types::{window, Series, SignalSample, Timestamp};
use crate::{DEFAULT_HISTORY_MAX_SAMPLES, DEFAULT_HISTORY_RETENTION_SECS};

/// Oldest instant still inside `retention`, saturating at the start of time
fn horizon(now: Timestamp, retention: Duration) -> Timestamp {
    now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Append-only buffer of samples with non-decreasing timestamps
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<SignalSample>,
    retention: Duration,
    max_len: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_RETENTION_SECS, DEFAULT_HISTORY_MAX_SAMPLES)
    }
}

impl SampleHistory {
    pub fn new(retention_secs: u64, max_len: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            retention: window(retention_secs),
            max_len: max_len.max(1),
        }
    }

    /// Append a sample and prune.
    ///
    /// A sample older than the newest one is an upstream defect: it panics in
    /// debug builds and is dropped in release builds. Returns whether it was kept.
    pub fn append(&mut self, sample: SignalSample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.at < last.at {
                debug_assert!(
                    false,
                    "non-monotonic sample: {} arrived after {}",
                    sample.at, last.at
                );
                warn!(at = %sample.at, newest = %last.at, "dropping out-of-order sample");
                return false;
            }
        }

        self.samples.push_back(sample);
        self.prune(sample.at);
        true
    }

    /// Drop samples that fell out of the retention window or over the count cap
    fn prune(&mut self, now: Timestamp) {
        let horizon = horizon(now, self.retention);
        while let Some(front) = self.samples.front() {
            if front.at <= horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        while self.samples.len() > self.max_len {
            self.samples.pop_front();
        }
    }

    /// Samples newer than `now - retention`, at most the newest `max_count`, oldest first
    pub fn tail(&self, now: Timestamp, retention: Duration, max_count: usize) -> Vec<SignalSample> {
        let horizon = horizon(now, retention);
        let recent: Vec<SignalSample> = self
            .samples
            .iter()
            .filter(|s| s.at > horizon)
            .copied()
            .collect();

        let skip = recent.len().saturating_sub(max_count);
        let tail: Vec<SignalSample> = recent.into_iter().skip(skip).collect();

        debug_assert!(
            tail.windows(2).all(|w| w[0].at <= w[1].at),
            "history tail out of order"
        );
        tail
    }

    /// All retained samples, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &SignalSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&SignalSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// The three parallel histories kept per link
#[derive(Debug, Clone, Default)]
pub struct LinkHistories {
    pub raw: SampleHistory,
    pub smoothed: SampleHistory,
    pub distance: SampleHistory,
}

impl LinkHistories {
    pub fn new(retention_secs: u64, max_len: usize) -> Self {
        Self {
            raw: SampleHistory::new(retention_secs, max_len),
            smoothed: SampleHistory::new(retention_secs, max_len),
            distance: SampleHistory::new(retention_secs, max_len),
        }
    }

    pub fn series(&self, series: Series) -> &SampleHistory {
        match series {
            Series::Raw => &self.raw,
            Series::Smoothed => &self.smoothed,
            Series::Distance => &self.distance,
        }
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.smoothed.clear();
        self.distance.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_append_and_latest() {
        let mut history = SampleHistory::new(60, 10);
        assert!(history.is_empty());
        history.append(SignalSample::new(at(0), -60.0));
        history.append(SignalSample::new(at(1), -61.0));
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().value, -61.0);
    }

    #[test]
    fn test_prune_by_age_on_append() {
        let mut history = SampleHistory::new(10, 100);
        history.append(SignalSample::new(at(0), -60.0));
        history.append(SignalSample::new(at(5), -61.0));
        history.append(SignalSample::new(at(12), -62.0));
        let values: Vec<f64> = history.samples().map(|s| s.value).collect();
        assert_eq!(values, vec![-61.0, -62.0]);
    }

    #[test]
    fn test_prune_by_count() {
        let mut history = SampleHistory::new(600, 3);
        for i in 0..6 {
            history.append(SignalSample::new(at(i), i as f64));
        }
        let values: Vec<f64> = history.samples().map(|s| s.value).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_tail_filters_and_caps() {
        let mut history = SampleHistory::new(600, 100);
        for i in 0..10 {
            history.append(SignalSample::new(at(i * 10), i as f64));
        }
        // newer than at(90) - 35s = at(55): samples at 60, 70, 80, 90
        let tail = history.tail(at(90), Duration::seconds(35), 3);
        let values: Vec<f64> = tail.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_tail_is_ordered() {
        let mut history = SampleHistory::new(600, 100);
        for i in [0, 1, 1, 2, 5, 5, 9] {
            history.append(SignalSample::new(at(i), 0.0));
        }
        let tail = history.tail(at(9), Duration::seconds(600), 100);
        assert!(tail.windows(2).all(|w| w[0].at <= w[1].at));
        assert_eq!(tail.len(), 7);
    }

    #[test]
    fn test_huge_retention_keeps_everything() {
        let mut history = SampleHistory::new(u64::MAX, 100);
        for i in 0..5 {
            history.append(SignalSample::new(at(i), 0.0));
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.tail(at(5), Duration::MAX, 100).len(), 5);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "non-monotonic sample")]
    fn test_out_of_order_panics_in_debug() {
        let mut history = SampleHistory::new(600, 100);
        history.append(SignalSample::new(at(5), 0.0));
        history.append(SignalSample::new(at(4), 0.0));
    }
}
