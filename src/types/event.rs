//! Events crossing the radio adapter boundary and the notification streams

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionState, DeviceId, Discovery, ObservedPeripheral};

/// Callbacks delivered by the radio adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RadioEvent {
    Discovered(Discovery),
    Connected {
        id: DeviceId,
    },
    ConnectFailed {
        id: DeviceId,
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        id: DeviceId,
        #[serde(default)]
        reason: String,
        /// True when the disconnect answers our own request
        #[serde(default)]
        requested: bool,
    },
}

impl RadioEvent {
    pub fn device(&self) -> &DeviceId {
        match self {
            RadioEvent::Discovered(discovery) => &discovery.id,
            RadioEvent::Connected { id }
            | RadioEvent::ConnectFailed { id, .. }
            | RadioEvent::Disconnected { id, .. } => id,
        }
    }
}

/// Fire-and-forget work requested from the outside world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    Connect(DeviceId),
    Disconnect(DeviceId),
    /// Post a timeout for `id` back after `after`, carrying `token`
    ArmTimer {
        id: DeviceId,
        token: u64,
        after: Duration,
    },
}

/// Registry notifications for downstream observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryEvent {
    Upserted(ObservedPeripheral),
    Evicted { id: DeviceId },
}

/// Connection supervision notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Updated { id: DeviceId, state: ConnectionState },
    /// Supervision ended: emitted exactly once per closed session
    Disconnected { id: DeviceId },
}
