//! Core types for proxlock

mod event;
mod link;
mod output;
mod peripheral;
mod reason;
mod sample;
mod state;

pub use event::{RadioCommand, RadioEvent, RegistryEvent, SupervisorEvent};
pub use link::{LinkConfiguration, LinkId, Zone};
pub use output::{LinkStatus, LinkTransition};
pub use peripheral::{ConnectionState, DeviceId, Discovery, ObservedPeripheral};
pub use reason::ReasonCode;
pub use sample::{window, Series, SignalSample, Timestamp};
pub use state::LinkState;
