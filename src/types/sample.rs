//! Signal samples

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::MAX_WINDOW_SECS;

/// Wall-clock instant used throughout the engine
pub type Timestamp = DateTime<Utc>;

/// Whole seconds as a time window, saturating at `MAX_WINDOW_SECS`
pub fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Immutable (timestamp, value) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub at: Timestamp,
    pub value: f64,
}

impl SignalSample {
    pub fn new(at: Timestamp, value: f64) -> Self {
        Self { at, value }
    }
}

/// Which of the three parallel histories of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    Raw,
    Smoothed,
    Distance,
}

