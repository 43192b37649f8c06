//! Per-roster run scheduling.
//!
//! The scheduler is a single actor task that owns every piece of mutable
//! scheduling state: one slot per roster (`running` plus at most one queued
//! `follow_up`), the set of rosters with pending change events, and a bounded
//! registry of run statuses. Everything else talks to it through a
//! [`SchedulerHandle`].
//!
//! Change events only mark a roster pending; the periodic tick drains the
//! pending set and starts at most one run per roster. Manual triggers bypass
//! the tick, and coalesce into a single follow-up while a run is in flight.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use rostersync_core::config::{ConfigStore, FileConfigStore};
use rostersync_core::RosterId;
use rostersync_sync::{pipeline, RunOptions, RunReport};

use crate::error::DaemonError;
use crate::paths::RUN_REGISTRY_CAPACITY;
use crate::runtime::unix_seconds_now;

/// Opaque id handed out for every accepted run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunHandle(pub u64);

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted, waiting behind the roster's in-flight run.
    Idle,
    Running,
    Failed,
    Succeeded,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, RunState::Failed | RunState::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub handle: RunHandle,
    pub roster: RosterId,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at_unix: u64,
}

impl RunStatus {
    fn new(handle: RunHandle, roster: &RosterId, state: RunState, detail: Option<String>) -> Self {
        Self {
            handle,
            roster: roster.clone(),
            state,
            detail,
            updated_at_unix: unix_seconds_now(),
        }
    }
}

/// What the `status` command reports for one roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    pub roster: RosterId,
    pub running: Option<RunHandle>,
    pub follow_up: Option<RunHandle>,
    pub pending: bool,
    pub last: Option<RunStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerOverview {
    pub tick_seconds: u64,
    pub rosters: Vec<SlotView>,
}

/// Executes one reconciliation run for a roster.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, roster: &RosterId) -> Result<RunReport, DaemonError>;
}

/// Runs the orchestrator against the file-backed adapters under `home`,
/// bounded by the roster's configured run budget.
pub struct LocalExecutor {
    home: PathBuf,
    configs: Arc<dyn ConfigStore>,
}

impl LocalExecutor {
    /// Reads roster config from the YAML files under `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let configs = Arc::new(FileConfigStore::new(home.clone()));
        Self::with_configs(home, configs)
    }

    pub fn with_configs(home: impl Into<PathBuf>, configs: Arc<dyn ConfigStore>) -> Self {
        Self {
            home: home.into(),
            configs,
        }
    }
}

#[async_trait]
impl RunExecutor for LocalExecutor {
    async fn execute(&self, roster: &RosterId) -> Result<RunReport, DaemonError> {
        let report = pipeline::run_roster_with(
            self.configs.as_ref(),
            &self.home,
            roster,
            RunOptions::default(),
        )
        .await?;
        Ok(report)
    }
}

enum Command {
    RosterChanged(RosterId),
    Trigger {
        roster: RosterId,
        respond_to: oneshot::Sender<RunHandle>,
    },
    RunStatus {
        handle: RunHandle,
        respond_to: oneshot::Sender<Option<RunStatus>>,
    },
    Overview {
        respond_to: oneshot::Sender<SchedulerOverview>,
    },
    Finished {
        roster: RosterId,
        handle: RunHandle,
        state: RunState,
        detail: Option<String>,
    },
}

/// Cloneable front door to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Mark a roster as changed; the next tick picks it up.
    pub async fn roster_changed(&self, roster: RosterId) -> Result<(), DaemonError> {
        self.tx
            .send(Command::RosterChanged(roster))
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler queue"))
    }

    /// Request a run now. Returns without waiting for the run.
    pub async fn trigger(&self, roster: RosterId) -> Result<RunHandle, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::Trigger { roster, respond_to })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("scheduler response"))
    }

    /// `None` once the handle is unknown or has been evicted.
    pub async fn run_status(&self, handle: RunHandle) -> Result<Option<RunStatus>, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::RunStatus { handle, respond_to })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("scheduler response"))
    }

    pub async fn overview(&self) -> Result<SchedulerOverview, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::Overview { respond_to })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler queue"))?;
        rx.await
            .map_err(|_| DaemonError::ChannelClosed("scheduler response"))
    }
}

#[derive(Debug, Default)]
struct Slot {
    running: Option<RunHandle>,
    follow_up: Option<RunHandle>,
    last: Option<RunStatus>,
}

/// Run statuses by handle. Past capacity the oldest finished entries go;
/// idle and running entries are never evicted.
struct RunRegistry {
    capacity: usize,
    entries: HashMap<RunHandle, RunStatus>,
    order: VecDeque<RunHandle>,
}

impl RunRegistry {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn upsert(&mut self, status: RunStatus) {
        if !self.entries.contains_key(&status.handle) {
            self.order.push_back(status.handle);
        }
        self.entries.insert(status.handle, status);
        self.evict();
    }

    fn get(&self, handle: RunHandle) -> Option<&RunStatus> {
        self.entries.get(&handle)
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let oldest = self.order.iter().position(|h| {
                self.entries
                    .get(h)
                    .map_or(true, |status| status.state.is_finished())
            });
            let Some(handle) = oldest.and_then(|i| self.order.remove(i)) else {
                break;
            };
            self.entries.remove(&handle);
        }
    }
}

pub struct Scheduler {
    executor: Arc<dyn RunExecutor>,
    tick: Duration,
    slots: BTreeMap<RosterId, Slot>,
    pending: BTreeSet<RosterId>,
    registry: RunRegistry,
    next_handle: u64,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn RunExecutor>, tick: Duration) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(64);
        let scheduler = Self {
            executor,
            tick,
            slots: BTreeMap::new(),
            pending: BTreeSet::new(),
            registry: RunRegistry::new(RUN_REGISTRY_CAPACITY),
            next_handle: 1,
            rx,
            tx: tx.clone(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Process commands and ticks until shutdown is broadcast.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => self.on_tick(),
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command);
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RosterChanged(roster) => {
                tracing::debug!(roster = %roster, "roster marked pending");
                self.pending.insert(roster);
            }
            Command::Trigger { roster, respond_to } => {
                let handle = self.trigger(roster);
                let _ = respond_to.send(handle);
            }
            Command::RunStatus { handle, respond_to } => {
                let _ = respond_to.send(self.registry.get(handle).cloned());
            }
            Command::Overview { respond_to } => {
                let _ = respond_to.send(self.overview());
            }
            Command::Finished {
                roster,
                handle,
                state,
                detail,
            } => self.finish(roster, handle, state, detail),
        }
    }

    fn on_tick(&mut self) {
        let drained = std::mem::take(&mut self.pending);
        for roster in drained {
            let slot = self.slot(&roster);
            if slot.running.is_some() {
                // A queued follow-up starts after the change and covers it.
                if slot.follow_up.is_none() {
                    self.pending.insert(roster);
                }
                continue;
            }
            let handle = self.allocate();
            tracing::info!(roster = %roster, handle = %handle, "tick starting run for changed roster");
            self.start(roster, handle);
        }
    }

    fn trigger(&mut self, roster: RosterId) -> RunHandle {
        let slot = self.slot(&roster);
        if let Some(running) = slot.running {
            if let Some(queued) = slot.follow_up {
                return queued;
            }
            let handle = self.allocate();
            self.slot(&roster).follow_up = Some(handle);
            self.registry.upsert(RunStatus::new(
                handle,
                &roster,
                RunState::Idle,
                Some(format!("queued behind run {running}")),
            ));
            tracing::info!(roster = %roster, handle = %handle, "trigger queued as follow-up");
            return handle;
        }
        let handle = self.allocate();
        tracing::info!(roster = %roster, handle = %handle, "manual trigger starting run");
        self.start(roster, handle);
        handle
    }

    fn start(&mut self, roster: RosterId, handle: RunHandle) {
        self.pending.remove(&roster);
        self.slot(&roster).running = Some(handle);
        self.registry
            .upsert(RunStatus::new(handle, &roster, RunState::Running, None));

        let executor = Arc::clone(&self.executor);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let run = {
                let roster = roster.clone();
                tokio::spawn(async move { executor.execute(&roster).await })
            };
            let (state, detail) = match run.await {
                Ok(Ok(report)) if report.succeeded() => (
                    RunState::Succeeded,
                    Some(format!(
                        "{} write calls, {} cells changed",
                        report.write_calls, report.changed_cells
                    )),
                ),
                Ok(Ok(report)) => (
                    RunState::Failed,
                    Some(
                        report
                            .error
                            .unwrap_or_else(|| format!("run stopped in {}", report.state)),
                    ),
                ),
                Ok(Err(err)) => (RunState::Failed, Some(err.to_string())),
                Err(err) => (RunState::Failed, Some(format!("run task failed: {err}"))),
            };
            let _ = tx
                .send(Command::Finished {
                    roster,
                    handle,
                    state,
                    detail,
                })
                .await;
        });
    }

    fn finish(
        &mut self,
        roster: RosterId,
        handle: RunHandle,
        state: RunState,
        detail: Option<String>,
    ) {
        match state {
            RunState::Failed => tracing::warn!(
                roster = %roster,
                handle = %handle,
                detail = detail.as_deref().unwrap_or(""),
                "run failed",
            ),
            _ => tracing::info!(
                roster = %roster,
                handle = %handle,
                detail = detail.as_deref().unwrap_or(""),
                "run finished",
            ),
        }

        let status = RunStatus::new(handle, &roster, state, detail);
        self.registry.upsert(status.clone());

        let slot = self.slot(&roster);
        if slot.running == Some(handle) {
            slot.running = None;
        }
        slot.last = Some(status);
        if let Some(next) = slot.follow_up.take() {
            self.start(roster, next);
        }
    }

    fn overview(&self) -> SchedulerOverview {
        let rosters: BTreeSet<&RosterId> = self.slots.keys().chain(self.pending.iter()).collect();
        SchedulerOverview {
            tick_seconds: self.tick.as_secs(),
            rosters: rosters
                .into_iter()
                .map(|roster| {
                    let slot = self.slots.get(roster);
                    SlotView {
                        roster: roster.clone(),
                        running: slot.and_then(|s| s.running),
                        follow_up: slot.and_then(|s| s.follow_up),
                        pending: self.pending.contains(roster),
                        last: slot.and_then(|s| s.last.clone()),
                    }
                })
                .collect(),
        }
    }

    fn slot(&mut self, roster: &RosterId) -> &mut Slot {
        self.slots.entry(roster.clone()).or_default()
    }

    fn allocate(&mut self) -> RunHandle {
        let handle = RunHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}
