//! proxlock: proximity-based presence engine
//!
//! Observes a paired peripheral's signal strength, smooths it, converts it to a
//! distance estimate, supervises an optional connection, and decides whether each
//! configured link is Linked or Unlinked. Unlinking drives the lock action.

pub mod config;
pub mod core;
pub mod error;
pub mod types;

// =============================================================================
// REGISTRY
// =============================================================================

/// Discovery records older than this are evicted (seconds)
pub const DEFAULT_REGISTRY_TTL_SECS: u64 = 120;

/// How often the engine sweeps stale records and re-evaluates links (seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

// =============================================================================
// CONNECTION SUPERVISION
// =============================================================================

/// Automatic connection attempts after the first one
pub const DEFAULT_RETRY_BUDGET: u8 = 1;

/// Supervision window per connection attempt (seconds)
/// Independent of the registry TTL
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ESTIMATION
// =============================================================================

/// Kalman process noise for RSSI smoothing
pub const DEFAULT_PROCESS_NOISE: f64 = 0.008;

/// Kalman measurement noise for RSSI smoothing
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 4.0;

/// Path-loss exponent (free space)
pub const DEFAULT_ENVIRONMENTAL_FACTOR: f64 = 2.0;

// =============================================================================
// HISTORY
// =============================================================================

/// Sample retention per history (seconds)
pub const DEFAULT_HISTORY_RETENTION_SECS: u64 = 300;

/// Maximum samples kept per history
pub const DEFAULT_HISTORY_MAX_SAMPLES: usize = 512;

// =============================================================================
// LIMITS
// =============================================================================

/// Longest accepted time window (TTL, idle timeout, retention, intervals): ten years
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
