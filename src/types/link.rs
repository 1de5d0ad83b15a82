//! Link configuration: which device, how close, how fresh

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{window, DeviceId};
use crate::{DEFAULT_ENVIRONMENTAL_FACTOR, MAX_WINDOW_SECS};

/// Name of a configured link
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LinkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for LinkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a link applies. Informational only: never gates the decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Zone {
    #[default]
    Anywhere,
    Named(String),
}

impl Zone {
    pub fn is_active(&self, active_zones: &HashSet<String>) -> bool {
        match self {
            Zone::Anywhere => true,
            Zone::Named(name) => active_zones.contains(name),
        }
    }
}

fn default_environmental_factor() -> f64 {
    DEFAULT_ENVIRONMENTAL_FACTOR
}

/// User-controlled settings of one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfiguration {
    pub device: DeviceId,
    /// Signal level (dBm) measured at one meter
    pub reference_at_one_meter: f64,
    /// Path-loss exponent: 2.0 in free space, higher indoors
    #[serde(default = "default_environmental_factor")]
    pub environmental_factor: f64,
    /// Maximum distance (meters) still counted as present
    pub max_distance: f64,
    /// Samples older than this make the device count as gone
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub require_connection: bool,
    #[serde(default)]
    pub zone: Zone,
}

impl LinkConfiguration {
    pub fn new(device: impl Into<DeviceId>, reference_at_one_meter: f64, max_distance: f64) -> Self {
        Self {
            device: device.into(),
            reference_at_one_meter,
            environmental_factor: DEFAULT_ENVIRONMENTAL_FACTOR,
            max_distance,
            idle_timeout_secs: None,
            require_connection: false,
            zone: Zone::Anywhere,
        }
    }

    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    pub fn with_connection(mut self) -> Self {
        self.require_connection = true;
        self
    }

    pub fn with_environmental_factor(mut self, factor: f64) -> Self {
        self.environmental_factor = factor;
        self
    }

    pub fn idle_timeout(&self) -> Option<chrono::Duration> {
        self.idle_timeout_secs.map(window)
    }

    /// Reject values that would make distance estimation meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.as_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "device",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.reference_at_one_meter.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "reference_at_one_meter",
                reason: "must be finite".to_string(),
            });
        }
        if !(self.environmental_factor.is_finite() && self.environmental_factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "environmental_factor",
                reason: format!("must be positive, got {}", self.environmental_factor),
            });
        }
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "max_distance",
                reason: format!("must be positive, got {}", self.max_distance),
            });
        }
        match self.idle_timeout_secs {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "idle_timeout_secs",
                    reason: "must be at least one second".to_string(),
                })
            }
            Some(secs) if secs > MAX_WINDOW_SECS => {
                return Err(ConfigError::InvalidValue {
                    field: "idle_timeout_secs",
                    reason: format!("must be at most {} seconds, got {}", MAX_WINDOW_SECS, secs),
                })
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let json = r#"{"device": "aa:bb", "reference_at_one_meter": -59, "max_distance": 2.5}"#;
        let config: LinkConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.environmental_factor, DEFAULT_ENVIRONMENTAL_FACTOR);
        assert_eq!(config.idle_timeout_secs, None);
        assert!(!config.require_connection);
        assert_eq!(config.zone, Zone::Anywhere);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_distance() {
        let config = LinkConfiguration::new("aa:bb", -59.0, 0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "max_distance", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_flat_path_loss() {
        let config = LinkConfiguration::new("aa:bb", -59.0, 2.0).with_environmental_factor(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "environmental_factor", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unbounded_idle_timeout() {
        let config = LinkConfiguration::new("aa:bb", -59.0, 2.0).with_idle_timeout(10_000_000_000_000_000);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "idle_timeout_secs", .. })
        ));

        let config = LinkConfiguration::new("aa:bb", -59.0, 2.0).with_idle_timeout(MAX_WINDOW_SECS);
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout(), Some(window(MAX_WINDOW_SECS)));
    }

    #[test]
    fn test_window_saturates() {
        assert_eq!(window(30), chrono::Duration::seconds(30));
        assert_eq!(window(u64::MAX), window(MAX_WINDOW_SECS));
    }

    #[test]
    fn test_zone_activity() {
        let mut active = HashSet::new();
        assert!(Zone::Anywhere.is_active(&active));
        assert!(!Zone::Named("office".into()).is_active(&active));
        active.insert("office".to_string());
        assert!(Zone::Named("office".into()).is_active(&active));
    }
}
