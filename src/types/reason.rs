//! Reason codes for link decisions and connection supervision

use serde::{Deserialize, Serialize};

/// Reason codes attached to every link decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ReasonCode {
    // =========================================================================
    // L001: Visibility
    // =========================================================================
    /// Link configured but never evaluated
    L001_NOT_EVALUATED,
    /// Device has never been observed, or its record was evicted
    L001_DEVICE_NOT_VISIBLE,
    /// Record exists but is older than the link's idle timeout
    L001_IDLE_TIMEOUT,

    // =========================================================================
    // L002: Distance
    // =========================================================================
    /// Estimated distance exceeds the configured maximum
    L002_OUT_OF_RANGE,
    /// No distance estimate available yet
    L002_NO_ESTIMATE,

    // =========================================================================
    // L003: Connection
    // =========================================================================
    /// Connection required but not (yet) established
    L003_CONNECTION_PENDING,
    /// Connection supervision ended without success
    L003_CONNECTION_LOST,

    // =========================================================================
    // L004: Presence
    // =========================================================================
    /// All link requirements satisfied
    L004_PRESENT,
}

impl ReasonCode {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::L001_NOT_EVALUATED => "L001_NOT_EVALUATED",
            Self::L001_DEVICE_NOT_VISIBLE => "L001_DEVICE_NOT_VISIBLE",
            Self::L001_IDLE_TIMEOUT => "L001_IDLE_TIMEOUT",
            Self::L002_OUT_OF_RANGE => "L002_OUT_OF_RANGE",
            Self::L002_NO_ESTIMATE => "L002_NO_ESTIMATE",
            Self::L003_CONNECTION_PENDING => "L003_CONNECTION_PENDING",
            Self::L003_CONNECTION_LOST => "L003_CONNECTION_LOST",
            Self::L004_PRESENT => "L004_PRESENT",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::L001_NOT_EVALUATED => "Not evaluated yet",
            Self::L001_DEVICE_NOT_VISIBLE => "Device not visible",
            Self::L001_IDLE_TIMEOUT => "Device silent longer than idle timeout",
            Self::L002_OUT_OF_RANGE => "Device beyond maximum distance",
            Self::L002_NO_ESTIMATE => "No distance estimate",
            Self::L003_CONNECTION_PENDING => "Waiting for connection",
            Self::L003_CONNECTION_LOST => "Connection supervision failed",
            Self::L004_PRESENT => "Device present",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
