//! Application configuration loaded from JSON
//!
//! Every field has a default, so `{}` is a valid (link-less) configuration.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{EvaluatorSettings, SupervisorConfig};
use crate::error::ConfigError;
use crate::types::{LinkConfiguration, LinkId};
use crate::{
    CONNECTION_TIMEOUT_SECS, DEFAULT_HISTORY_MAX_SAMPLES, DEFAULT_HISTORY_RETENTION_SECS,
    DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE, DEFAULT_REGISTRY_TTL_SECS,
    DEFAULT_RETRY_BUDGET, DEFAULT_SWEEP_INTERVAL_SECS, MAX_WINDOW_SECS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_REGISTRY_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub retry_budget: u8,
    pub timeout_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            timeout_secs: CONNECTION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherSettings {
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for SmootherSettings {
    fn default() -> Self {
        Self {
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub retention_secs: u64,
    pub max_samples: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_HISTORY_RETENTION_SECS,
            max_samples: DEFAULT_HISTORY_MAX_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// argv of the system lock command, e.g. ["loginctl", "lock-session"]
    pub command: Option<Vec<String>>,
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistrySettings,
    pub supervisor: SupervisorSettings,
    pub smoother: SmootherSettings,
    pub history: HistorySettings,
    pub links: BTreeMap<LinkId, LinkConfiguration>,
    /// Per-link idle timeout overrides (seconds)
    pub idle_timeouts: BTreeMap<LinkId, u64>,
    pub active_zones: Vec<String>,
    pub lock: LockSettings,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.ttl_secs == 0 {
            return Err(invalid("registry.ttl_secs", "must be at least one second"));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(invalid("registry.sweep_interval_secs", "must be at least one second"));
        }
        if self.supervisor.timeout_secs == 0 {
            return Err(invalid("supervisor.timeout_secs", "must be at least one second"));
        }
        for (field, value) in [
            ("smoother.process_noise", self.smoother.process_noise),
            ("smoother.measurement_noise", self.smoother.measurement_noise),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(field, &format!("must be a non-negative number, got {}", value)));
            }
        }
        if self.history.max_samples == 0 {
            return Err(invalid("history.max_samples", "must be at least one"));
        }
        if self.history.retention_secs == 0 {
            return Err(invalid("history.retention_secs", "must be at least one second"));
        }

        for link in self.links.values() {
            link.validate()?;
        }
        for (link, secs) in &self.idle_timeouts {
            if !self.links.contains_key(link) {
                return Err(ConfigError::UnknownLink(link.clone()));
            }
            if *secs == 0 {
                return Err(invalid("idle_timeouts", "must be at least one second"));
            }
        }
        for (field, secs) in [
            ("registry.ttl_secs", self.registry.ttl_secs),
            ("registry.sweep_interval_secs", self.registry.sweep_interval_secs),
            ("supervisor.timeout_secs", self.supervisor.timeout_secs),
            ("history.retention_secs", self.history.retention_secs),
        ]
        .into_iter()
        .chain(self.idle_timeouts.values().map(|secs| ("idle_timeouts", *secs)))
        {
            if secs > MAX_WINDOW_SECS {
                return Err(invalid(field, &format!("must be at most {} seconds, got {}", MAX_WINDOW_SECS, secs)));
            }
        }
        if matches!(&self.lock.command, Some(argv) if argv.is_empty()) {
            return Err(invalid("lock.command", "must not be empty"));
        }
        Ok(())
    }

    /// Links with idle timeout overrides applied
    pub fn effective_links(&self) -> Vec<(LinkId, LinkConfiguration)> {
        self.links
            .iter()
            .map(|(id, config)| {
                let mut config = config.clone();
                if let Some(secs) = self.idle_timeouts.get(id) {
                    config.idle_timeout_secs = Some(*secs);
                }
                (id.clone(), config)
            })
            .collect()
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            retry_budget: self.supervisor.retry_budget,
            timeout: Duration::from_secs(self.supervisor.timeout_secs),
        }
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            retention_secs: self.history.retention_secs,
            max_samples: self.history.max_samples,
            process_noise: self.smoother.process_noise,
            measurement_noise: self.smoother.measurement_noise,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.registry.sweep_interval_secs)
    }

    pub fn zones(&self) -> HashSet<String> {
        self.active_zones.iter().cloned().collect()
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.registry.ttl_secs, DEFAULT_REGISTRY_TTL_SECS);
        assert_eq!(config.supervisor.retry_budget, DEFAULT_RETRY_BUDGET);
        assert_eq!(config.supervisor_config().timeout, Duration::from_secs(10));
        assert!(config.links.is_empty());
    }

    #[test]
    fn test_idle_timeout_for_unknown_link_is_rejected() {
        let json = r#"{
            "links": {"phone": {"device": "aa:bb", "reference_at_one_meter": -59, "max_distance": 2}},
            "idle_timeouts": {"watch": 30}
        }"#;
        match AppConfig::from_json(json) {
            Err(ConfigError::UnknownLink(link)) => assert_eq!(link.as_str(), "watch"),
            other => panic!("expected UnknownLink, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_timeout_override_applied() {
        let json = r#"{
            "links": {"phone": {"device": "aa:bb", "reference_at_one_meter": -59, "max_distance": 2}},
            "idle_timeouts": {"phone": 30}
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let links = config.effective_links();
        assert_eq!(links[0].1.idle_timeout_secs, Some(30));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = AppConfig::from_json(r#"{"registry": {"ttl_secs": 0}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "registry.ttl_secs", .. })
        ));
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let result = AppConfig::from_json(r#"{"history": {"retention_secs": 18446744073709551615}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "history.retention_secs", .. })
        ));

        let json = r#"{
            "links": {"phone": {"device": "aa:bb", "reference_at_one_meter": -59, "max_distance": 2}},
            "idle_timeouts": {"phone": 10000000000000000}
        }"#;
        assert!(matches!(
            AppConfig::from_json(json),
            Err(ConfigError::InvalidValue { field: "idle_timeouts", .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(AppConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
