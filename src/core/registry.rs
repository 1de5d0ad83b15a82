//! Device registry: which peripherals are visible right now, and since when
//!
//! Reads are filtered by the TTL as well as swept, so an expired record is never
//! handed out even if `evict_stale` has not run yet.

use std::collections::HashMap;

use chrono::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{
    window, ConnectionState, DeviceId, Discovery, ObservedPeripheral, RegistryEvent, Timestamp,
};
use crate::{DEFAULT_REGISTRY_TTL_SECS, DEFAULT_RETRY_BUDGET};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tracks observable peripherals, evicting those not heard within the TTL
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, ObservedPeripheral>,
    ttl: Duration,
    retry_budget: u8,
    /// Connection bookkeeping of supervised devices, kept across eviction
    supervised: HashMap<DeviceId, (ConnectionState, u8)>,
    next_sequence: u64,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_TTL_SECS, DEFAULT_RETRY_BUDGET)
    }
}

impl DeviceRegistry {
    pub fn new(ttl_secs: u64, retry_budget: u8) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: HashMap::new(),
            ttl: window(ttl_secs),
            retry_budget,
            supervised: HashMap::new(),
            next_sequence: 1,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Upsert from a discovery report and notify subscribers.
    ///
    /// Returns the updated record, or None if the report is older than the
    /// record it would replace.
    pub fn on_discovered(&mut self, discovery: &Discovery) -> Option<ObservedPeripheral> {
        let sequence = self.next_sequence;
        let record = match self.devices.get_mut(&discovery.id) {
            Some(existing) => {
                if discovery.at < existing.last_seen {
                    debug_assert!(
                        false,
                        "non-monotonic discovery for {}: {} arrived after {}",
                        discovery.id, discovery.at, existing.last_seen
                    );
                    warn!(
                        device = %discovery.id,
                        at = %discovery.at,
                        last_seen = %existing.last_seen,
                        "ignoring discovery older than current record"
                    );
                    return None;
                }
                existing.refresh(discovery);
                existing.sequence = sequence;
                existing.clone()
            }
            None => {
                let mut record = ObservedPeripheral::from_discovery(discovery, self.retry_budget);
                record.sequence = sequence;
                if let Some(&(state, retries_left)) = self.supervised.get(&discovery.id) {
                    record.connection = state;
                    record.retries_left = retries_left;
                }
                debug!(device = %discovery.id, label = %record.label(), level = discovery.level, "new peripheral");
                self.devices.insert(discovery.id.clone(), record.clone());
                record
            }
        };
        self.next_sequence += 1;

        let _ = self.events.send(RegistryEvent::Upserted(record.clone()));
        Some(record)
    }

    /// Remove every record not heard within the TTL. Returns the evicted ids.
    pub fn evict_stale(&mut self, now: Timestamp) -> Vec<DeviceId> {
        let ttl = self.ttl;
        let mut evicted: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|p| p.age(now) > ttl)
            .map(|p| p.id.clone())
            .collect();
        evicted.sort();

        for id in &evicted {
            self.devices.remove(id);
            debug!(device = %id, "evicted stale peripheral");
            let _ = self.events.send(RegistryEvent::Evicted { id: id.clone() });
        }
        evicted
    }

    fn is_fresh(&self, peripheral: &ObservedPeripheral, now: Timestamp) -> bool {
        peripheral.age(now) <= self.ttl
    }

    /// Record for `id`, if present and within the TTL at `now`
    pub fn get(&self, id: &DeviceId, now: Timestamp) -> Option<&ObservedPeripheral> {
        self.devices
            .get(id)
            .filter(|p| self.is_fresh(p, now))
    }

    /// All records within the TTL at `now`, sorted by identifier
    pub fn all(&self, now: Timestamp) -> Vec<ObservedPeripheral> {
        let mut devices: Vec<ObservedPeripheral> = self
            .devices
            .values()
            .filter(|p| self.is_fresh(p, now))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Update connection bookkeeping for `id`.
    ///
    /// Remembered while the device is supervised, so a record recreated after
    /// eviction starts from the live session state.
    pub fn set_connection(&mut self, id: &DeviceId, state: ConnectionState, retries_left: u8) {
        if state == ConnectionState::Disconnected {
            self.supervised.remove(id);
        } else {
            self.supervised.insert(id.clone(), (state, retries_left));
        }

        let Some(record) = self.devices.get_mut(id) else {
            return;
        };
        if record.connection == state && record.retries_left == retries_left {
            return;
        }
        record.connection = state;
        record.retries_left = retries_left;
        let _ = self.events.send(RegistryEvent::Upserted(record.clone()));
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
    fn test_upsert_preserves_connection_state() {
        let mut registry = DeviceRegistry::new(120, 1);
        let id = DeviceId::from("aa:bb");
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(0)));
        registry.set_connection(&id, ConnectionState::Connected, 1);

        let record = registry
            .on_discovered(&Discovery::new("aa:bb", -65.0, at(2)).with_name("Phone"))
            .unwrap();
        assert_eq!(record.connection, ConnectionState::Connected);
        assert_eq!(record.level, -65.0);
        assert_eq!(record.name.as_deref(), Some("Phone"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evict_stale() {
        let mut registry = DeviceRegistry::new(120, 1);
        registry.on_discovered(&Discovery::new("old", -60.0, at(0)));
        registry.on_discovered(&Discovery::new("new", -60.0, at(100)));

        let evicted = registry.evict_stale(at(121));
        assert_eq!(evicted, vec![DeviceId::from("old")]);
        assert_eq!(registry.all(at(121)).len(), 1);
    }

    #[test]
    fn test_expired_record_hidden_before_sweep() {
        let mut registry = DeviceRegistry::new(120, 1);
        let id = DeviceId::from("aa:bb");
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(0)));

        assert!(registry.get(&id, at(120)).is_some());
        assert!(registry.get(&id, at(121)).is_none());
        assert!(registry.all(at(121)).is_empty());
        // still physically present until swept
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_stale_report_ignored() {
        let mut registry = DeviceRegistry::new(120, 1);
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(10)));
        assert!(registry.on_discovered(&Discovery::new("aa:bb", -90.0, at(5))).is_none());
        let id = DeviceId::from("aa:bb");
        assert_eq!(registry.get(&id, at(10)).unwrap().level, -60.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "non-monotonic discovery")]
    fn test_stale_report_panics_in_debug() {
        let mut registry = DeviceRegistry::new(120, 1);
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(10)));
        registry.on_discovered(&Discovery::new("aa:bb", -90.0, at(5)));
    }

    #[test]
    fn test_same_instant_report_accepted_with_new_sequence() {
        let mut registry = DeviceRegistry::new(120, 1);
        let first = registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(1))).unwrap();
        let second = registry.on_discovered(&Discovery::new("aa:bb", -90.0, at(1))).unwrap();
        assert_eq!(second.level, -90.0);
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_connection_state_survives_eviction() {
        let mut registry = DeviceRegistry::new(120, 1);
        let id = DeviceId::from("aa:bb");
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(0)));
        registry.set_connection(&id, ConnectionState::Connected, 1);
        registry.evict_stale(at(200));

        let record = registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(201))).unwrap();
        assert_eq!(record.connection, ConnectionState::Connected);

        registry.set_connection(&id, ConnectionState::Disconnected, 1);
        registry.evict_stale(at(400));
        let record = registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(401))).unwrap();
        assert_eq!(record.connection, ConnectionState::Disconnected);
    }

    #[test]
    fn test_notifications() {
        let mut registry = DeviceRegistry::new(10, 1);
        let mut rx = registry.subscribe();
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at(0)));
        registry.evict_stale(at(20));

        assert!(matches!(rx.try_recv().unwrap(), RegistryEvent::Upserted(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::Evicted { id: DeviceId::from("aa:bb") }
        );
    }
}
