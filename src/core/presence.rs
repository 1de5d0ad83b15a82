//! Presence core: registry, supervisor and evaluator wired together
//!
//! Synchronous and free of I/O. Every input returns the radio commands the
//! caller must carry out; the engine is the only caller in production.

use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::core::{
    ConnectionSupervisor, DeviceRegistry, Evaluation, EvaluatorSettings, LinkEvaluator, SessionState,
    SupervisorConfig,
};
use crate::error::ConfigError;
use crate::types::{
    DeviceId, Discovery, LinkConfiguration, LinkId, LinkStatus, LinkTransition, ObservedPeripheral,
    RadioCommand, RegistryEvent, Series, SignalSample, SupervisorEvent, Timestamp,
};
use crate::{DEFAULT_REGISTRY_TTL_SECS, DEFAULT_RETRY_BUDGET};

#[derive(Debug)]
pub struct PresenceCore {
    registry: DeviceRegistry,
    supervisor: ConnectionSupervisor,
    evaluator: LinkEvaluator,
}

impl Default for PresenceCore {
    fn default() -> Self {
        Self::new(
            DeviceRegistry::new(DEFAULT_REGISTRY_TTL_SECS, DEFAULT_RETRY_BUDGET),
            SupervisorConfig::default(),
            EvaluatorSettings::default(),
        )
    }
}

impl PresenceCore {
    pub fn new(registry: DeviceRegistry, supervisor: SupervisorConfig, settings: EvaluatorSettings) -> Self {
        Self {
            registry,
            supervisor: ConnectionSupervisor::new(supervisor),
            evaluator: LinkEvaluator::new(settings),
        }
    }

    /// Build a core from configuration. Links are added later through
    /// `configure_link` so their first evaluation happens at a known time.
    pub fn from_config(config: &AppConfig) -> Self {
        let supervisor = config.supervisor_config();
        let registry = DeviceRegistry::new(config.registry.ttl_secs, supervisor.retry_budget);
        let mut core = Self::new(registry, supervisor, config.evaluator_settings());
        core.set_active_zones(config.zones());
        core
    }

    // -------------------------------------------------------------------------
    // Radio adapter callbacks
    // -------------------------------------------------------------------------

    pub fn on_discovered(&mut self, discovery: &Discovery) -> Vec<RadioCommand> {
        match self.registry.on_discovered(discovery) {
            Some(peripheral) => self.evaluator.on_device_update(
                &peripheral.id,
                &mut self.registry,
                &mut self.supervisor,
                discovery.at,
                true,
            ),
            None => Vec::new(),
        }
    }

    pub fn on_connected(&mut self, id: &DeviceId, now: Timestamp) -> Vec<RadioCommand> {
        let mut commands = self.supervisor.on_connected(id, &mut self.registry);
        commands.extend(self.after_connection_change(id, now));
        commands
    }

    pub fn on_connect_failed(&mut self, id: &DeviceId, now: Timestamp) -> Vec<RadioCommand> {
        let mut commands = self.supervisor.on_connect_failed(id, &mut self.registry);
        commands.extend(self.after_connection_change(id, now));
        commands
    }

    pub fn on_disconnected(&mut self, id: &DeviceId, requested: bool, now: Timestamp) -> Vec<RadioCommand> {
        let mut commands = self.supervisor.on_disconnected(id, requested, &mut self.registry);
        commands.extend(self.after_connection_change(id, now));
        commands
    }

    /// A supervision timer armed with `token` expired
    pub fn on_timeout(&mut self, id: &DeviceId, token: u64, now: Timestamp) -> Vec<RadioCommand> {
        let mut commands = self.supervisor.on_timeout(id, token, &mut self.registry);
        commands.extend(self.after_connection_change(id, now));
        commands
    }

    /// Connection events never open new sessions, or a failing device would
    /// be retried forever; the next discovery does that.
    fn after_connection_change(&mut self, id: &DeviceId, now: Timestamp) -> Vec<RadioCommand> {
        self.evaluator
            .on_device_update(id, &mut self.registry, &mut self.supervisor, now, false)
    }

    // -------------------------------------------------------------------------
    // Periodic work
    // -------------------------------------------------------------------------

    /// Evict stale records, then re-evaluate every link against `now`
    pub fn sweep(&mut self, now: Timestamp) -> Vec<RadioCommand> {
        self.registry.evict_stale(now);
        self.evaluator
            .evaluate_all(&mut self.registry, &mut self.supervisor, now, false)
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn configure_link(
        &mut self,
        link: LinkId,
        config: LinkConfiguration,
        now: Timestamp,
    ) -> Result<Vec<RadioCommand>, ConfigError> {
        self.evaluator
            .configure(link, config, &mut self.registry, &mut self.supervisor, now)
    }

    pub fn remove_link(&mut self, link: &LinkId) -> Result<Vec<RadioCommand>, ConfigError> {
        self.evaluator
            .remove(link, &mut self.registry, &mut self.supervisor)
    }

    pub fn set_idle_timeout(
        &mut self,
        link: &LinkId,
        idle_timeout_secs: Option<u64>,
        now: Timestamp,
    ) -> Result<Vec<RadioCommand>, ConfigError> {
        self.evaluator.set_idle_timeout(
            link,
            idle_timeout_secs,
            &mut self.registry,
            &mut self.supervisor,
            now,
        )
    }

    pub fn set_active_zones(&mut self, zones: HashSet<String>) {
        self.evaluator.set_active_zones(zones);
    }

    pub fn evaluate(&mut self, link: &LinkId, now: Timestamp) -> Result<Evaluation, ConfigError> {
        self.evaluator
            .evaluate(link, &mut self.registry, &mut self.supervisor, now)
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn device(&self, id: &DeviceId, now: Timestamp) -> Option<&ObservedPeripheral> {
        self.registry.get(id, now)
    }

    pub fn devices(&self, now: Timestamp) -> Vec<ObservedPeripheral> {
        self.registry.all(now)
    }

    pub fn session_state(&self, id: &DeviceId) -> SessionState {
        self.supervisor.state(id)
    }

    pub fn armed_timer(&self, id: &DeviceId) -> Option<u64> {
        self.supervisor.armed_timer(id)
    }

    pub fn link_status(&self, link: &LinkId) -> Option<LinkStatus> {
        self.evaluator.status(link)
    }

    pub fn link_statuses(&self) -> Vec<LinkStatus> {
        self.evaluator.statuses()
    }

    pub fn history(
        &self,
        link: &LinkId,
        series: Series,
        now: Timestamp,
        retention: chrono::Duration,
        max_count: usize,
    ) -> Option<Vec<SignalSample>> {
        self.evaluator.history(link, series, now, retention, max_count)
    }

    pub fn subscribe_devices(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<LinkTransition> {
        self.evaluator.subscribe()
    }

    pub fn subscribe_supervisor(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }
}
