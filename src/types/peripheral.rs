//! Observed peripheral records

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Stable radio identifier of a peripheral (usually its address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection state as seen by consumers of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        write!(f, "{}", name)
    }
}

/// One discovery report delivered by the radio adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    /// Advertised transmit power, used as a calibration hint
    #[serde(default)]
    pub tx_power: Option<f64>,
    /// Received signal strength (dBm)
    pub level: f64,
    pub at: Timestamp,
}

impl Discovery {
    pub fn new(id: impl Into<DeviceId>, level: f64, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: None,
            tx_power: None,
            level,
            at,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tx_power(mut self, tx_power: f64) -> Self {
        self.tx_power = Some(tx_power);
        self
    }
}

/// A radio-visible device at its most recent observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPeripheral {
    pub id: DeviceId,
    pub name: Option<String>,
    pub tx_power: Option<f64>,
    /// Last observed signal strength (dBm)
    pub level: f64,
    /// When this record was created
    pub first_seen: Timestamp,
    /// When the device was last heard
    pub last_seen: Timestamp,
    /// Connection retries left for the current supervision session
    pub retries_left: u8,
    pub connection: ConnectionState,
    /// Registry-wide upsert counter; each accepted report gets a new value
    #[serde(skip)]
    pub sequence: u64,
}

impl ObservedPeripheral {
    /// Create a fresh record from a discovery report
    pub fn from_discovery(discovery: &Discovery, retries_left: u8) -> Self {
        Self {
            id: discovery.id.clone(),
            name: discovery.name.clone(),
            tx_power: discovery.tx_power,
            level: discovery.level,
            first_seen: discovery.at,
            last_seen: discovery.at,
            retries_left,
            connection: ConnectionState::Disconnected,
            sequence: 0,
        }
    }

    /// Refresh from a newer report. Connection state and retry budget survive.
    pub fn refresh(&mut self, discovery: &Discovery) {
        self.name = discovery.name.clone();
        self.tx_power = discovery.tx_power;
        self.level = discovery.level;
        self.last_seen = discovery.at;
    }

    /// Age of the record at `now`
    pub fn age(&self, now: Timestamp) -> chrono::Duration {
        now.signed_duration_since(self.last_seen)
    }

    /// Display label (name if known, otherwise the identifier)
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_refresh_keeps_connection_state() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut record = ObservedPeripheral::from_discovery(&Discovery::new("aa:bb", -60.0, t0), 1);
        record.connection = ConnectionState::Connected;
        record.retries_left = 0;

        let later = Discovery::new("aa:bb", -70.0, t0 + chrono::Duration::seconds(3)).with_name("Phone");
        record.refresh(&later);

        assert_eq!(record.connection, ConnectionState::Connected);
        assert_eq!(record.retries_left, 0);
        assert_eq!(record.level, -70.0);
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.label(), "Phone");
    }

    #[test]
    fn test_device_id_serializes_transparently() {
        let json = serde_json::to_string(&DeviceId::from("aa:bb")).unwrap();
        assert_eq!(json, "\"aa:bb\"");
    }
}
