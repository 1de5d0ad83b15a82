//! Radio adapter boundary
//!
//! The radio stack lives elsewhere. The engine only asks it to start/stop
//! discovery and to connect/disconnect; results come back as `RadioEvent`s
//! submitted through `EngineHandle::radio_event`.

use std::sync::Mutex;

use tracing::info;

use crate::types::DeviceId;

/// Capabilities consumed from the radio stack. All calls are fire-and-forget.
pub trait RadioAdapter: Send + Sync + 'static {
    fn start_discovery(&self);
    fn stop_discovery(&self);
    fn connect(&self, id: &DeviceId);
    fn disconnect(&self, id: &DeviceId);
}

/// A request the engine made of the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    StartDiscovery,
    StopDiscovery,
    Connect(DeviceId),
    Disconnect(DeviceId),
}

/// Adapter for replay and HTTP-fed setups: logs and records every request,
/// leaving the answers to whoever feeds the radio events.
#[derive(Debug, Default)]
pub struct LoggingAdapter {
    calls: Mutex<Vec<AdapterCall>>,
}

impl LoggingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: AdapterCall) {
        info!(?call, "radio request");
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

impl RadioAdapter for LoggingAdapter {
    fn start_discovery(&self) {
        self.record(AdapterCall::StartDiscovery);
    }

    fn stop_discovery(&self) {
        self.record(AdapterCall::StopDiscovery);
    }

    fn connect(&self, id: &DeviceId) {
        self.record(AdapterCall::Connect(id.clone()));
    }

    fn disconnect(&self, id: &DeviceId) {
        self.record(AdapterCall::Disconnect(id.clone()));
    }
}
