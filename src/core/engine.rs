//! Engine: the single serialized execution context around `PresenceCore`
//!
//! Radio callbacks, timer expiries, sweeps, configuration changes and queries
//! all travel as commands over one queue and are applied in arrival order.
//! Nothing outside the engine task touches the core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::{Clock, LockAction, LogOnlyLock, PresenceCore, RadioAdapter};
use crate::error::{ConfigError, EngineError};
use crate::types::{
    DeviceId, LinkConfiguration, LinkId, LinkState, LinkStatus, LinkTransition, ObservedPeripheral,
    RadioCommand, RadioEvent, RegistryEvent, Series, SignalSample, SupervisorEvent,
};
use crate::DEFAULT_SWEEP_INTERVAL_SECS;

/// Receivers for the engine's notification streams
struct Subscriptions {
    transitions: broadcast::Receiver<LinkTransition>,
    devices: broadcast::Receiver<RegistryEvent>,
    supervisor: broadcast::Receiver<SupervisorEvent>,
}

enum Command {
    Radio(RadioEvent),
    Timeout {
        id: DeviceId,
        token: u64,
    },
    Sweep {
        reply: oneshot::Sender<()>,
    },
    Barrier {
        reply: oneshot::Sender<()>,
    },
    ConfigureLink {
        link: LinkId,
        config: LinkConfiguration,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    RemoveLink {
        link: LinkId,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    SetIdleTimeout {
        link: LinkId,
        idle_timeout_secs: Option<u64>,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Evaluate {
        link: LinkId,
        reply: oneshot::Sender<Result<LinkState, ConfigError>>,
    },
    Devices {
        reply: oneshot::Sender<Vec<ObservedPeripheral>>,
    },
    Links {
        reply: oneshot::Sender<Vec<LinkStatus>>,
    },
    Link {
        link: LinkId,
        reply: oneshot::Sender<Option<LinkStatus>>,
    },
    History {
        link: LinkId,
        series: Series,
        retention: chrono::Duration,
        max_count: usize,
        reply: oneshot::Sender<Option<Vec<SignalSample>>>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscriptions>,
    },
    Shutdown,
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Submit an adapter callback. Safe to call from any thread.
    pub fn radio_event(&self, event: RadioEvent) -> Result<(), EngineError> {
        self.tx
            .send(Command::Radio(event))
            .map_err(|_| EngineError::Stopped)
    }

    pub async fn configure_link(&self, link: LinkId, config: LinkConfiguration) -> Result<(), EngineError> {
        self.request(|reply| Command::ConfigureLink { link, config, reply })
            .await?
            .map_err(EngineError::from)
    }

    pub async fn remove_link(&self, link: LinkId) -> Result<(), EngineError> {
        self.request(|reply| Command::RemoveLink { link, reply })
            .await?
            .map_err(EngineError::from)
    }

    pub async fn set_idle_timeout(&self, link: LinkId, idle_timeout_secs: Option<u64>) -> Result<(), EngineError> {
        self.request(|reply| Command::SetIdleTimeout {
            link,
            idle_timeout_secs,
            reply,
        })
        .await?
        .map_err(EngineError::from)
    }

    pub async fn evaluate(&self, link: LinkId) -> Result<LinkState, EngineError> {
        self.request(|reply| Command::Evaluate { link, reply })
            .await?
            .map_err(EngineError::from)
    }

    /// Evict stale records and re-evaluate every link now
    pub async fn sweep(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    /// Wait until every command queued before this call has been applied
    pub async fn barrier(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Barrier { reply }).await
    }

    pub async fn devices(&self) -> Result<Vec<ObservedPeripheral>, EngineError> {
        self.request(|reply| Command::Devices { reply }).await
    }

    pub async fn links(&self) -> Result<Vec<LinkStatus>, EngineError> {
        self.request(|reply| Command::Links { reply }).await
    }

    pub async fn link(&self, link: LinkId) -> Result<Option<LinkStatus>, EngineError> {
        self.request(|reply| Command::Link { link, reply }).await
    }

    pub async fn history(
        &self,
        link: LinkId,
        series: Series,
        retention: chrono::Duration,
        max_count: usize,
    ) -> Result<Option<Vec<SignalSample>>, EngineError> {
        self.request(|reply| Command::History {
            link,
            series,
            retention,
            max_count,
            reply,
        })
        .await
    }

    pub async fn subscribe_transitions(&self) -> Result<broadcast::Receiver<LinkTransition>, EngineError> {
        Ok(self.subscribe().await?.transitions)
    }

    pub async fn subscribe_devices(&self) -> Result<broadcast::Receiver<RegistryEvent>, EngineError> {
        Ok(self.subscribe().await?.devices)
    }

    /// Session state changes and supervised disconnects
    pub async fn subscribe_disconnects(&self) -> Result<broadcast::Receiver<SupervisorEvent>, EngineError> {
        Ok(self.subscribe().await?.supervisor)
    }

    /// Stop the engine after the commands already queued
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    async fn subscribe(&self) -> Result<Subscriptions, EngineError> {
        self.request(|reply| Command::Subscribe { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }
}

/// Engine configuration and collaborators, consumed by `spawn`
pub struct Engine {
    core: PresenceCore,
    adapter: Arc<dyn RadioAdapter>,
    clock: Arc<dyn Clock>,
    lock: Arc<dyn LockAction>,
    sweep_interval: Duration,
}

impl Engine {
    pub fn new(core: PresenceCore, adapter: Arc<dyn RadioAdapter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            core,
            adapter,
            clock,
            lock: Arc::new(LogOnlyLock),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn LockAction>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Start the engine task and the lock watcher. Must run inside a tokio runtime.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let transitions = self.core.subscribe_transitions();
        tokio::spawn(watch_transitions(transitions, Arc::clone(&self.lock)));

        let worker = EngineTask {
            core: self.core,
            adapter: self.adapter,
            clock: self.clock,
            timers: tx.downgrade(),
            timer_tasks: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(rx, self.sweep_interval));
        (EngineHandle { tx }, task)
    }
}

/// Locks once per Linked → Unlinked transition
async fn watch_transitions(mut transitions: broadcast::Receiver<LinkTransition>, lock: Arc<dyn LockAction>) {
    loop {
        match transitions.recv().await {
            Ok(transition) if transition.is_unlink() => {
                info!(link = %transition.link, reason = transition.reason.code(), "link lost, locking");
                if let Err(e) = lock.lock(&transition.link) {
                    error!(link = %transition.link, error = %e, "lock action failed");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "lock watcher lagged behind transitions");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

struct EngineTask {
    core: PresenceCore,
    adapter: Arc<dyn RadioAdapter>,
    clock: Arc<dyn Clock>,
    /// Weak so that dropping every handle still ends the loop
    timers: mpsc::WeakUnboundedSender<Command>,
    /// Sleeping timeout task per device, with the token it will post
    timer_tasks: HashMap<DeviceId, (u64, JoinHandle<()>)>,
}

impl EngineTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, sweep_interval: Duration) {
        info!(?sweep_interval, "engine started");
        self.adapter.start_discovery();

        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        sweep.tick().await;

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.handle(cmd),
                    }
                }
                _ = sweep.tick() => {
                    let commands = self.core.sweep(self.clock.now());
                    self.execute(commands);
                }
            }
        }

        for (_, (_, task)) in self.timer_tasks.drain() {
            task.abort();
        }
        self.adapter.stop_discovery();
        info!("engine stopped");
    }

    fn handle(&mut self, cmd: Command) {
        let now = self.clock.now();
        match cmd {
            Command::Radio(event) => {
                let commands = self.on_radio_event(event);
                self.execute(commands);
            }
            Command::Timeout { id, token } => {
                let commands = self.core.on_timeout(&id, token, now);
                self.execute(commands);
            }
            Command::Sweep { reply } => {
                let commands = self.core.sweep(now);
                self.execute(commands);
                let _ = reply.send(());
            }
            Command::Barrier { reply } => {
                let _ = reply.send(());
            }
            Command::ConfigureLink { link, config, reply } => {
                let result = self.core.configure_link(link, config, now);
                let _ = reply.send(self.apply(result));
            }
            Command::RemoveLink { link, reply } => {
                let result = self.core.remove_link(&link);
                let _ = reply.send(self.apply(result));
            }
            Command::SetIdleTimeout {
                link,
                idle_timeout_secs,
                reply,
            } => {
                let result = self.core.set_idle_timeout(&link, idle_timeout_secs, now);
                let _ = reply.send(self.apply(result));
            }
            Command::Evaluate { link, reply } => {
                let result = self.core.evaluate(&link, now).map(|evaluation| {
                    let state = evaluation.state;
                    self.execute(evaluation.commands);
                    state
                });
                let _ = reply.send(result);
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.core.devices(now));
            }
            Command::Links { reply } => {
                let _ = reply.send(self.core.link_statuses());
            }
            Command::Link { link, reply } => {
                let _ = reply.send(self.core.link_status(&link));
            }
            Command::History {
                link,
                series,
                retention,
                max_count,
                reply,
            } => {
                let _ = reply.send(self.core.history(&link, series, now, retention, max_count));
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(Subscriptions {
                    transitions: self.core.subscribe_transitions(),
                    devices: self.core.subscribe_devices(),
                    supervisor: self.core.subscribe_supervisor(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn on_radio_event(&mut self, event: RadioEvent) -> Vec<RadioCommand> {
        let now = self.clock.now();
        match event {
            RadioEvent::Discovered(discovery) => self.core.on_discovered(&discovery),
            RadioEvent::Connected { id } => self.core.on_connected(&id, now),
            RadioEvent::ConnectFailed { id, reason } => {
                debug!(device = %id, %reason, "connect failed");
                self.core.on_connect_failed(&id, now)
            }
            RadioEvent::Disconnected { id, reason, requested } => {
                debug!(device = %id, %reason, requested, "disconnected");
                self.core.on_disconnected(&id, requested, now)
            }
        }
    }

    fn apply(&mut self, result: Result<Vec<RadioCommand>, ConfigError>) -> Result<(), ConfigError> {
        match result {
            Ok(commands) => {
                self.execute(commands);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "configuration rejected");
                Err(e)
            }
        }
    }

    fn execute(&mut self, commands: Vec<RadioCommand>) {
        for command in commands {
            match command {
                RadioCommand::Connect(id) => self.adapter.connect(&id),
                RadioCommand::Disconnect(id) => self.adapter.disconnect(&id),
                RadioCommand::ArmTimer { id, token, after } => {
                    let timers = self.timers.clone();
                    let device = id.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        if let Some(tx) = timers.upgrade() {
                            let _ = tx.send(Command::Timeout { id: device, token });
                        }
                    });
                    if let Some((_, previous)) = self.timer_tasks.insert(id, (token, task)) {
                        previous.abort();
                    }
                }
            }
        }
        self.reap_timers();
    }

    /// Abort timer tasks whose token the supervisor no longer has armed
    fn reap_timers(&mut self) {
        let core = &self.core;
        self.timer_tasks.retain(|id, (token, task)| {
            let armed = core.armed_timer(id) == Some(*token);
            if !armed {
                debug!(device = %id, token = *token, "timer cancelled");
                task.abort();
            }
            armed
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LoggingAdapter, ManualClock};
    use crate::types::{Discovery, LinkConfiguration};
    use chrono::{TimeZone, Utc};

    fn worker(tx: &mpsc::UnboundedSender<Command>) -> EngineTask {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        EngineTask {
            core: PresenceCore::default(),
            adapter: Arc::new(LoggingAdapter::new()),
            clock: Arc::new(clock),
            timers: tx.downgrade(),
            timer_tasks: HashMap::new(),
        }
    }

    fn supervised(task: &mut EngineTask) -> DeviceId {
        let id = DeviceId::from("aa:bb");
        let now = task.clock.now();
        let config = LinkConfiguration::new(id.clone(), -59.0, 2.0).with_connection();
        let commands = task.core.configure_link("phone".into(), config, now).unwrap();
        task.execute(commands);
        let commands = task.core.on_discovered(&Discovery::new(id.clone(), -59.0, now));
        task.execute(commands);
        id
    }

    #[tokio::test]
    async fn test_connected_session_cancels_its_timer_task() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = worker(&tx);
        let id = supervised(&mut task);

        let (token, pending) = task.timer_tasks.get(&id).map(|(t, h)| (*t, h.abort_handle())).unwrap();
        assert_eq!(task.core.armed_timer(&id), Some(token));

        let commands = task.core.on_connected(&id, task.clock.now());
        task.execute(commands);
        assert!(task.timer_tasks.is_empty());

        for _ in 0..100 {
            if pending.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pending.is_finished());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_timer_task() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = worker(&tx);
        let id = supervised(&mut task);
        let first = task.timer_tasks.get(&id).map(|(t, _)| *t).unwrap();

        let commands = task.core.on_disconnected(&id, false, task.clock.now());
        task.execute(commands);

        let second = task.timer_tasks.get(&id).map(|(t, _)| *t).unwrap();
        assert_ne!(first, second);
        assert_eq!(task.core.armed_timer(&id), Some(second));
        assert_eq!(task.timer_tasks.len(), 1);
    }
}
