//! Connection supervisor: per-device maintained-connection state machine
//!
//! State transitions:
//! - Idle → Connecting: maintain() with no session for the device
//! - Connecting/Reconnecting → Connected: adapter success
//! - Connecting/Reconnecting/Connected → Reconnecting: failure or unsolicited
//!   disconnect while retries remain (timer restarted, connect reissued)
//! - * → Closed: retries exhausted, timeout, or explicit disconnect()
//!
//! The supervisor performs no I/O. Every input returns the `RadioCommand`s the
//! caller must execute. Timers carry a token; a timeout whose token no longer
//! matches the session's armed timer is stale and ignored.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::DeviceRegistry;
use crate::types::{ConnectionState, DeviceId, RadioCommand, SupervisorEvent};
use crate::{CONNECTION_TIMEOUT_SECS, DEFAULT_RETRY_BUDGET};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of one supervised device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// Why a session closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    RetriesExhausted,
    Timeout,
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    /// Automatic attempts after the first one
    pub retry_budget: u8,
    /// Window each attempt gets before the session is declared failed
    pub timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }
}

/// One maintained-connection attempt sequence
#[derive(Debug)]
struct Session {
    state: SessionState,
    retries_left: u8,
    /// Token of the armed timeout, None while connected
    timer: Option<u64>,
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    sessions: HashMap<DeviceId, Session>,
    next_token: u64,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            sessions: HashMap::new(),
            next_token: 1,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> SupervisorConfig {
        self.config
    }

    /// Current state for `id`; Idle when nothing is supervised
    pub fn state(&self, id: &DeviceId) -> SessionState {
        self.sessions
            .get(id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn has_session(&self, id: &DeviceId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Token of the timeout currently armed for `id`, if any
    pub fn armed_timer(&self, id: &DeviceId) -> Option<u64> {
        self.sessions.get(id).and_then(|s| s.timer)
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.state(id) == SessionState::Connected
    }

    /// Start maintaining a connection. Idempotent.
    pub fn maintain(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        if self.sessions.contains_key(id) {
            debug!(device = %id, "connection already supervised");
            return Vec::new();
        }

        info!(device = %id, retry_budget = self.config.retry_budget, "maintaining connection");
        let token = self.issue_token();
        self.sessions.insert(
            id.clone(),
            Session {
                state: SessionState::Connecting,
                retries_left: self.config.retry_budget,
                timer: Some(token),
            },
        );
        registry.set_connection(id, ConnectionState::Reconnecting, self.config.retry_budget);
        self.notify(SupervisorEvent::Updated {
            id: id.clone(),
            state: ConnectionState::Reconnecting,
        });

        vec![self.arm(id, token), RadioCommand::Connect(id.clone())]
    }

    /// Adapter reports a successful connection
    pub fn on_connected(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        let budget = self.config.retry_budget;
        let Some(session) = self.sessions.get_mut(id) else {
            debug!(device = %id, "connect callback without session ignored");
            return Vec::new();
        };
        if session.state == SessionState::Connected {
            return Vec::new();
        }

        session.state = SessionState::Connected;
        session.retries_left = budget;
        session.timer = None;
        info!(device = %id, "connected");

        registry.set_connection(id, ConnectionState::Connected, budget);
        self.notify(SupervisorEvent::Updated {
            id: id.clone(),
            state: ConnectionState::Connected,
        });
        Vec::new()
    }

    /// Adapter reports a failed connection attempt
    pub fn on_connect_failed(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        self.retry_or_close(id, registry)
    }

    /// Adapter reports a dropped connection
    pub fn on_disconnected(
        &mut self,
        id: &DeviceId,
        requested: bool,
        registry: &mut DeviceRegistry,
    ) -> Vec<RadioCommand> {
        if !requested {
            return self.retry_or_close(id, registry);
        }
        if self.sessions.contains_key(id) {
            self.close(id, CloseCause::Requested, registry)
        } else {
            Vec::new()
        }
    }

    /// A timer armed with `token` expired
    pub fn on_timeout(&mut self, id: &DeviceId, token: u64, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        if self.armed_timer(id) != Some(token) {
            debug!(device = %id, token, "stale timeout ignored");
            return Vec::new();
        }
        warn!(device = %id, "connection attempt timed out");
        self.close(id, CloseCause::Timeout, registry)
    }

    /// Release supervision immediately. Idempotent.
    pub fn disconnect(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        if !self.sessions.contains_key(id) {
            return Vec::new();
        }
        self.close(id, CloseCause::Requested, registry)
    }

    fn retry_or_close(&mut self, id: &DeviceId, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        let Some(retries_left) = self.sessions.get(id).map(|s| s.retries_left) else {
            debug!(device = %id, "failure callback without session ignored");
            return Vec::new();
        };
        if retries_left == 0 {
            return self.close(id, CloseCause::RetriesExhausted, registry);
        }

        let token = self.issue_token();
        let Some(session) = self.sessions.get_mut(id) else {
            return Vec::new();
        };
        session.retries_left -= 1;
        session.state = SessionState::Reconnecting;
        session.timer = Some(token);
        let retries_left = session.retries_left;
        info!(device = %id, retries_left, "reconnecting");

        registry.set_connection(id, ConnectionState::Reconnecting, retries_left);
        self.notify(SupervisorEvent::Updated {
            id: id.clone(),
            state: ConnectionState::Reconnecting,
        });
        vec![self.arm(id, token), RadioCommand::Connect(id.clone())]
    }

    /// Remove the session and report the disconnect exactly once
    fn close(&mut self, id: &DeviceId, cause: CloseCause, registry: &mut DeviceRegistry) -> Vec<RadioCommand> {
        let Some(mut session) = self.sessions.remove(id) else {
            return Vec::new();
        };
        session.state = SessionState::Closed;
        session.timer = None;
        info!(device = %id, ?cause, state = %session.state, "supervision closed");

        registry.set_connection(id, ConnectionState::Disconnected, session.retries_left);
        self.notify(SupervisorEvent::Updated {
            id: id.clone(),
            state: ConnectionState::Disconnected,
        });
        self.notify(SupervisorEvent::Disconnected { id: id.clone() });

        match cause {
            CloseCause::Timeout | CloseCause::Requested => vec![RadioCommand::Disconnect(id.clone())],
            CloseCause::RetriesExhausted => Vec::new(),
        }
    }

    fn issue_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    fn arm(&self, id: &DeviceId, token: u64) -> RadioCommand {
        RadioCommand::ArmTimer {
            id: id.clone(),
            token,
            after: self.config.timeout,
        }
    }

    fn notify(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Discovery;
    use chrono::{TimeZone, Utc};

    fn setup() -> (ConnectionSupervisor, DeviceRegistry, DeviceId) {
        let mut registry = DeviceRegistry::new(120, 1);
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        registry.on_discovered(&Discovery::new("aa:bb", -60.0, at));
        (ConnectionSupervisor::default(), registry, DeviceId::from("aa:bb"))
    }

    fn armed_token(commands: &[RadioCommand]) -> u64 {
        commands
            .iter()
            .find_map(|c| match c {
                RadioCommand::ArmTimer { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn disconnect_count(events: &[SupervisorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::Disconnected { .. }))
            .count()
    }

    #[test]
    fn test_maintain_is_idempotent() {
        let (mut sup, mut reg, id) = setup();
        let first = sup.maintain(&id, &mut reg);
        assert!(first.contains(&RadioCommand::Connect(id.clone())));
        assert_eq!(sup.state(&id), SessionState::Connecting);

        let second = sup.maintain(&id, &mut reg);
        assert!(second.is_empty());
    }

    #[test]
    fn test_connect_success() {
        let (mut sup, mut reg, id) = setup();
        sup.maintain(&id, &mut reg);
        sup.on_connected(&id, &mut reg);
        assert!(sup.is_connected(&id));
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(reg.get(&id, now).unwrap().connection, ConnectionState::Connected);
    }

    #[test]
    fn test_one_retry_then_close() {
        let (mut sup, mut reg, id) = setup();
        let mut rx = sup.subscribe();
        sup.maintain(&id, &mut reg);

        let retry = sup.on_connect_failed(&id, &mut reg);
        assert!(retry.contains(&RadioCommand::Connect(id.clone())));
        assert_eq!(sup.state(&id), SessionState::Reconnecting);

        let closed = sup.on_connect_failed(&id, &mut reg);
        assert!(closed.is_empty());
        assert_eq!(sup.state(&id), SessionState::Idle);
        assert_eq!(disconnect_count(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_stale_timeout_after_success_ignored() {
        let (mut sup, mut reg, id) = setup();
        let token = armed_token(&sup.maintain(&id, &mut reg));
        sup.on_connected(&id, &mut reg);
        assert!(sup.on_timeout(&id, token, &mut reg).is_empty());
        assert!(sup.is_connected(&id));
    }

    #[test]
    fn test_timeout_restarted_on_retry() {
        let (mut sup, mut reg, id) = setup();
        let first = armed_token(&sup.maintain(&id, &mut reg));
        let second = armed_token(&sup.on_connect_failed(&id, &mut reg));
        assert_ne!(first, second);

        // the first timer is stale now
        assert!(sup.on_timeout(&id, first, &mut reg).is_empty());
        assert_eq!(sup.state(&id), SessionState::Reconnecting);

        let commands = sup.on_timeout(&id, second, &mut reg);
        assert_eq!(commands, vec![RadioCommand::Disconnect(id.clone())]);
        assert_eq!(sup.state(&id), SessionState::Idle);
    }

    #[test]
    fn test_racing_triggers_emit_single_disconnect() {
        let (mut sup, mut reg, id) = setup();
        let mut rx = sup.subscribe();
        sup.maintain(&id, &mut reg);
        let token = armed_token(&sup.on_connect_failed(&id, &mut reg));

        sup.on_timeout(&id, token, &mut reg);
        sup.on_connect_failed(&id, &mut reg);
        sup.disconnect(&id, &mut reg);
        sup.on_disconnected(&id, true, &mut reg);

        assert_eq!(disconnect_count(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_unsolicited_disconnect_retries() {
        let (mut sup, mut reg, id) = setup();
        sup.maintain(&id, &mut reg);
        sup.on_connected(&id, &mut reg);

        let commands = sup.on_disconnected(&id, false, &mut reg);
        assert!(commands.contains(&RadioCommand::Connect(id.clone())));
        assert_eq!(sup.state(&id), SessionState::Reconnecting);
    }

    #[test]
    fn test_explicit_disconnect_is_idempotent() {
        let (mut sup, mut reg, id) = setup();
        let mut rx = sup.subscribe();
        sup.maintain(&id, &mut reg);

        assert_eq!(sup.disconnect(&id, &mut reg), vec![RadioCommand::Disconnect(id.clone())]);
        assert!(sup.disconnect(&id, &mut reg).is_empty());
        assert_eq!(disconnect_count(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_configurable_retry_budget() {
        let (_, mut reg, id) = setup();
        let mut sup = ConnectionSupervisor::new(SupervisorConfig {
            retry_budget: 3,
            ..SupervisorConfig::default()
        });
        sup.maintain(&id, &mut reg);
        for _ in 0..3 {
            sup.on_connect_failed(&id, &mut reg);
            assert_eq!(sup.state(&id), SessionState::Reconnecting);
        }
        sup.on_connect_failed(&id, &mut reg);
        assert_eq!(sup.state(&id), SessionState::Idle);
    }
}
