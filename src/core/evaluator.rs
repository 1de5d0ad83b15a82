//! Link evaluator: fuses visibility, distance and connection into Linked/Unlinked
//!
//! Decision per link:
//! - not visible (never seen, evicted, or silent past idle timeout) → Unlinked
//! - visible: ingest raw → smoothed → distance, then
//!   Linked iff distance ≤ max_distance and (if required) connected
//!
//! Transitions are broadcast only when the decision changes.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::{estimate_distance, ConnectionSupervisor, DeviceRegistry, LinkHistories, SignalSmoother};
use crate::error::ConfigError;
use crate::types::{
    DeviceId, LinkConfiguration, LinkId, LinkState, LinkStatus, LinkTransition, ObservedPeripheral,
    RadioCommand, ReasonCode, Series, SignalSample, Timestamp,
};
use crate::{
    DEFAULT_HISTORY_MAX_SAMPLES, DEFAULT_HISTORY_RETENTION_SECS, DEFAULT_MEASUREMENT_NOISE,
    DEFAULT_PROCESS_NOISE,
};

const TRANSITION_CHANNEL_CAPACITY: usize = 256;

/// Parameters for the per-link estimation pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorSettings {
    pub retention_secs: u64,
    pub max_samples: usize,
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_HISTORY_RETENTION_SECS,
            max_samples: DEFAULT_HISTORY_MAX_SAMPLES,
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

/// Result of evaluating one link
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: LinkState,
    pub reason: ReasonCode,
    pub distance: Option<f64>,
    pub commands: Vec<RadioCommand>,
}

/// Runtime state of one configured link
#[derive(Debug)]
struct LinkRuntime {
    id: LinkId,
    config: LinkConfiguration,
    state: LinkState,
    reason: ReasonCode,
    distance: Option<f64>,
    histories: LinkHistories,
    smoother: SignalSmoother,
    last_ingested: Option<Timestamp>,
    /// Registry sequence of the last ingested report
    last_sequence: Option<u64>,
    last_evaluated: Option<Timestamp>,
}

impl LinkRuntime {
    fn new(id: LinkId, config: LinkConfiguration, settings: &EvaluatorSettings) -> Self {
        Self {
            id,
            config,
            state: LinkState::Unlinked,
            reason: ReasonCode::L001_NOT_EVALUATED,
            distance: None,
            histories: LinkHistories::new(settings.retention_secs, settings.max_samples),
            smoother: SignalSmoother::new(settings.process_noise, settings.measurement_noise),
            last_ingested: None,
            last_sequence: None,
            last_evaluated: None,
        }
    }

    /// Point the link at a different physical device
    fn redirect(&mut self) {
        self.smoother.reseed();
        self.histories.clear();
        self.last_ingested = None;
        self.last_sequence = None;
        self.distance = None;
    }

    /// Recompute the newest distance after a calibration change
    fn recalibrate(&mut self) {
        let (Some(estimate), Some(at)) = (self.smoother.estimate(), self.last_ingested) else {
            return;
        };
        let distance = estimate_distance(
            self.config.reference_at_one_meter,
            self.config.environmental_factor,
            estimate,
        );
        self.histories.distance.append(SignalSample::new(at, distance));
    }

    /// Push one observation through raw → smoothed → distance
    fn ingest(&mut self, peripheral: &ObservedPeripheral) {
        // Already ingested, or a recreated record older than the history
        if self.last_sequence.is_some_and(|seq| peripheral.sequence <= seq)
            || self.last_ingested.is_some_and(|t| peripheral.last_seen < t)
        {
            return;
        }
        self.last_sequence = Some(peripheral.sequence);
        self.last_ingested = Some(peripheral.last_seen);

        let at = peripheral.last_seen;
        if !self.histories.raw.append(SignalSample::new(at, peripheral.level)) {
            return;
        }
        let smoothed = self.smoother.update(peripheral.level);
        self.histories.smoothed.append(SignalSample::new(at, smoothed));

        let distance = estimate_distance(
            self.config.reference_at_one_meter,
            self.config.environmental_factor,
            smoothed,
        );
        self.histories.distance.append(SignalSample::new(at, distance));
        debug!(link = %self.id, raw = peripheral.level, smoothed, distance, "sample ingested");
    }

    fn evaluate(
        &mut self,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
        may_connect: bool,
    ) -> (Evaluation, Option<LinkTransition>) {
        let device = self.config.device.clone();

        let peripheral = registry.get(&device, now).cloned();
        let visibility = match &peripheral {
            None => Err(ReasonCode::L001_DEVICE_NOT_VISIBLE),
            Some(p) => match self.config.idle_timeout() {
                Some(idle) if p.age(now) > idle => Err(ReasonCode::L001_IDLE_TIMEOUT),
                _ => Ok(p),
            },
        };

        let mut commands = Vec::new();
        let (state, reason, distance) = match visibility {
            Err(reason) => (LinkState::Unlinked, reason, None),
            Ok(p) => {
                self.ingest(p);

                if self.config.require_connection && may_connect && !supervisor.has_session(&device) {
                    commands.extend(supervisor.maintain(&device, registry));
                }

                let distance = self.histories.distance.latest().map(|s| s.value);
                let (state, reason) = match distance {
                    None => (LinkState::Unlinked, ReasonCode::L002_NO_ESTIMATE),
                    // NaN fails the bound too
                    Some(d) if !(d <= self.config.max_distance) => {
                        (LinkState::Unlinked, ReasonCode::L002_OUT_OF_RANGE)
                    }
                    Some(_) if self.config.require_connection && !supervisor.is_connected(&device) => {
                        if supervisor.has_session(&device) {
                            (LinkState::Unlinked, ReasonCode::L003_CONNECTION_PENDING)
                        } else {
                            (LinkState::Unlinked, ReasonCode::L003_CONNECTION_LOST)
                        }
                    }
                    Some(_) => (LinkState::Linked, ReasonCode::L004_PRESENT),
                };
                (state, reason, distance)
            }
        };

        let old = self.state;
        self.state = state;
        self.reason = reason;
        self.distance = distance;
        self.last_evaluated = Some(now);

        let transition = (old != state).then(|| LinkTransition {
            link: self.id.clone(),
            old,
            new: state,
            reason,
            distance,
            at: now,
        });

        let evaluation = Evaluation {
            state,
            reason,
            distance,
            commands,
        };
        (evaluation, transition)
    }
}

/// Owns every link's runtime state and the transition stream
#[derive(Debug)]
pub struct LinkEvaluator {
    links: BTreeMap<LinkId, LinkRuntime>,
    settings: EvaluatorSettings,
    active_zones: HashSet<String>,
    transitions: broadcast::Sender<LinkTransition>,
}

impl Default for LinkEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorSettings::default())
    }
}

impl LinkEvaluator {
    pub fn new(settings: EvaluatorSettings) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            links: BTreeMap::new(),
            settings,
            active_zones: HashSet::new(),
            transitions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkTransition> {
        self.transitions.subscribe()
    }

    pub fn set_active_zones(&mut self, zones: HashSet<String>) {
        self.active_zones = zones;
    }

    pub fn state(&self, link: &LinkId) -> Option<LinkState> {
        self.links.get(link).map(|l| l.state)
    }

    pub fn config(&self, link: &LinkId) -> Option<&LinkConfiguration> {
        self.links.get(link).map(|l| &l.config)
    }

    /// Add or replace a link, then evaluate it immediately
    pub fn configure(
        &mut self,
        link: LinkId,
        config: LinkConfiguration,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
    ) -> Result<Vec<RadioCommand>, ConfigError> {
        config.validate()?;
        let mut commands = Vec::new();

        let previous = match self.links.get_mut(&link) {
            Some(runtime) => {
                let previous = std::mem::replace(&mut runtime.config, config.clone());
                if previous.device != config.device {
                    info!(link = %link, from = %previous.device, to = %config.device, "link redirected");
                    runtime.redirect();
                } else if previous.reference_at_one_meter != config.reference_at_one_meter
                    || previous.environmental_factor != config.environmental_factor
                {
                    runtime.recalibrate();
                }
                Some(previous)
            }
            None => {
                info!(link = %link, device = %config.device, "link configured");
                self.links
                    .insert(link.clone(), LinkRuntime::new(link.clone(), config.clone(), &self.settings));
                None
            }
        };

        // Release supervision nobody needs any more
        if let Some(previous) = previous {
            let dropped_requirement = previous.require_connection
                && (previous.device != config.device || !config.require_connection);
            if dropped_requirement {
                commands.extend(self.release_if_unused(&previous.device, registry, supervisor));
            }
        }

        commands.extend(self.evaluate_with(&link, registry, supervisor, now, true)?.commands);
        Ok(commands)
    }

    /// Drop a link and any supervision only it needed
    pub fn remove(
        &mut self,
        link: &LinkId,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
    ) -> Result<Vec<RadioCommand>, ConfigError> {
        let runtime = self
            .links
            .remove(link)
            .ok_or_else(|| ConfigError::UnknownLink(link.clone()))?;
        info!(link = %link, "link removed");

        if runtime.config.require_connection {
            Ok(self.release_if_unused(&runtime.config.device, registry, supervisor))
        } else {
            Ok(Vec::new())
        }
    }

    /// Change only the idle timeout of an existing link
    pub fn set_idle_timeout(
        &mut self,
        link: &LinkId,
        idle_timeout_secs: Option<u64>,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
    ) -> Result<Vec<RadioCommand>, ConfigError> {
        let mut config = self
            .config(link)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownLink(link.clone()))?;
        config.idle_timeout_secs = idle_timeout_secs;
        self.configure(link.clone(), config, registry, supervisor, now)
    }

    /// Evaluate one link now
    pub fn evaluate(
        &mut self,
        link: &LinkId,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
    ) -> Result<Evaluation, ConfigError> {
        self.evaluate_with(link, registry, supervisor, now, true)
    }

    /// Re-evaluate every link bound to `device`
    pub fn on_device_update(
        &mut self,
        device: &DeviceId,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
        may_connect: bool,
    ) -> Vec<RadioCommand> {
        let links: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| &l.config.device == device)
            .map(|l| l.id.clone())
            .collect();
        self.evaluate_many(&links, registry, supervisor, now, may_connect)
    }

    /// Re-evaluate every link
    pub fn evaluate_all(
        &mut self,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
        may_connect: bool,
    ) -> Vec<RadioCommand> {
        let links: Vec<LinkId> = self.links.keys().cloned().collect();
        self.evaluate_many(&links, registry, supervisor, now, may_connect)
    }

    fn evaluate_many(
        &mut self,
        links: &[LinkId],
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
        may_connect: bool,
    ) -> Vec<RadioCommand> {
        let mut commands = Vec::new();
        for link in links {
            if let Ok(evaluation) = self.evaluate_with(link, registry, supervisor, now, may_connect) {
                commands.extend(evaluation.commands);
            }
        }
        commands
    }

    fn evaluate_with(
        &mut self,
        link: &LinkId,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
        now: Timestamp,
        may_connect: bool,
    ) -> Result<Evaluation, ConfigError> {
        let runtime = self
            .links
            .get_mut(link)
            .ok_or_else(|| ConfigError::UnknownLink(link.clone()))?;

        let (evaluation, transition) = runtime.evaluate(registry, supervisor, now, may_connect);
        if let Some(transition) = transition {
            info!(
                link = %transition.link,
                old = %transition.old,
                new = %transition.new,
                reason = transition.reason.code(),
                "link transition"
            );
            let _ = self.transitions.send(transition);
        }
        Ok(evaluation)
    }

    fn release_if_unused(
        &self,
        device: &DeviceId,
        registry: &mut DeviceRegistry,
        supervisor: &mut ConnectionSupervisor,
    ) -> Vec<RadioCommand> {
        let still_needed = self
            .links
            .values()
            .any(|l| &l.config.device == device && l.config.require_connection);
        if still_needed {
            Vec::new()
        } else {
            supervisor.disconnect(device, registry)
        }
    }

    /// Read-only status of one link
    pub fn status(&self, link: &LinkId) -> Option<LinkStatus> {
        self.links.get(link).map(|runtime| LinkStatus {
            link: runtime.id.clone(),
            device: runtime.config.device.clone(),
            state: runtime.state,
            reason: runtime.reason,
            distance: runtime.distance,
            require_connection: runtime.config.require_connection,
            zone_active: runtime.config.zone.is_active(&self.active_zones),
            samples: runtime.histories.raw.len(),
            last_evaluated: runtime.last_evaluated,
        })
    }

    /// Status of every link, ordered by link id
    pub fn statuses(&self) -> Vec<LinkStatus> {
        self.links.keys().filter_map(|id| self.status(id)).collect()
    }

    /// Ordered samples of one series, filtered and capped like `SampleHistory::tail`
    pub fn history(
        &self,
        link: &LinkId,
        series: Series,
        now: Timestamp,
        retention: chrono::Duration,
        max_count: usize,
    ) -> Option<Vec<SignalSample>> {
        self.links
            .get(link)
            .map(|runtime| runtime.histories.series(series).tail(now, retention, max_count))
    }
}

// =============================================================================
// TESTS
// =============================================================================
