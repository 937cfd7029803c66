//! Worker supervisor and the building registry.
//!
//! The supervisor is the only component that polls the control backend. It
//! keeps the registry's workers in line with the desired state: spawn what is
//! desired and missing, signal stop to what is no longer desired, and reap
//! finished threads. Stream and health readers only ever go through `Registry`.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::Serialize;

use crate::building::{BuildingConfig, ControlSnapshot};
use crate::frame::Frame;
use crate::pipeline::PipelineFactory;
use crate::report::ReportingClient;
use crate::worker::{BuildingWorker, WorkerExit, WorkerSettings, WorkerShared, WorkerState};

/// Interval between control polls.
pub const CONTROL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What to do with a building whose worker failed while still desired on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Leave it failed until the control plane switches it off and on again.
    Never,
    /// Respawn after a doubling delay, starting at `initial` and capped at `max`.
    Backoff { initial: Duration, max: Duration },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

impl RestartPolicy {
    /// Delay before restart attempt `failures` (1-based), without jitter.
    pub fn delay(&self, failures: u32) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::Backoff { initial, max } => {
                let factor = 1u32 << failures.saturating_sub(1).min(16);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
}

struct WorkerHandle {
    config: BuildingConfig,
    shared: Arc<WorkerShared>,
    stop_tx: Sender<()>,
    stop_requested: bool,
    join: Option<JoinHandle<WorkerExit>>,
}

/// Operator view of one registered worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub building_id: String,
    pub state: WorkerState,
    pub direction: Option<String>,
}

/// Building id → worker handle. Cheap to clone; all clones share one map.
#[derive(Clone, Default)]
pub struct Registry {
    workers: Arc<Mutex<HashMap<String, WorkerHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, WorkerHandle>>> {
        self.workers
            .lock()
            .map_err(|_| anyhow!("worker registry lock poisoned"))
    }

    /// Shared state of a building's worker, if one is registered.
    pub fn shared(&self, building_id: &str) -> Result<Option<Arc<WorkerShared>>> {
        Ok(self.lock()?.get(building_id).map(|h| h.shared.clone()))
    }

    /// Copy of the building's latest annotated frame.
    ///
    /// The registry lock is released before the frame slot is read.
    pub fn frame(&self, building_id: &str) -> Result<Option<Frame>> {
        match self.shared(building_id)? {
            Some(shared) => shared.frame().snapshot(),
            None => Ok(None),
        }
    }

    /// Workers that have not terminated yet.
    pub fn active_count(&self) -> Result<usize> {
        Ok(self
            .lock()?
            .values()
            .filter(|h| h.shared.is_active())
            .count())
    }

    /// Every registered worker, sorted by building id.
    pub fn statuses(&self) -> Result<Vec<WorkerStatus>> {
        let workers = self.lock()?;
        let mut statuses = workers
            .iter()
            .map(|(id, handle)| {
                Ok(WorkerStatus {
                    building_id: id.clone(),
                    state: handle.shared.state()?,
                    direction: handle.config.direction.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        statuses.sort_by(|a, b| a.building_id.cmp(&b.building_id));
        Ok(statuses)
    }

    pub fn contains(&self, building_id: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(building_id))
    }
}

#[derive(Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub restart: RestartPolicy,
    pub worker: WorkerSettings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: CONTROL_POLL_INTERVAL,
            restart: RestartPolicy::default(),
            worker: WorkerSettings::default(),
        }
    }
}

#[derive(Debug)]
struct FailureRecord {
    failures: u32,
    retry_at: Option<Instant>,
}

pub struct Supervisor {
    client: Arc<dyn ReportingClient>,
    factory: Arc<dyn PipelineFactory>,
    registry: Registry,
    config: SupervisorConfig,
    failures: HashMap<String, FailureRecord>,
}

impl Supervisor {
    pub fn new(
        client: Arc<dyn ReportingClient>,
        factory: Arc<dyn PipelineFactory>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            client,
            factory,
            registry: Registry::new(),
            config,
            failures: HashMap::new(),
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Poll until `shutdown` fires or disconnects. Workers are not drained.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        log::info!(
            "supervisor: polling control every {:?}",
            self.config.poll_interval
        );
        loop {
            self.poll_once()?;
            match shutdown.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        log::info!("supervisor: shutting down");
        Ok(())
    }

    /// One control cycle. A failed fetch leaves running workers untouched.
    pub fn poll_once(&mut self) -> Result<()> {
        match self.client.fetch_control() {
            Ok(snapshot) => self.sync(&snapshot),
            Err(err) => {
                log::warn!(
                    "supervisor: control fetch failed, keeping current workers: {:#}",
                    err
                );
                self.reap().map(|_| ())
            }
        }
    }

    /// Bring the registry in line with `snapshot`.
    pub fn sync(&mut self, snapshot: &ControlSnapshot) -> Result<()> {
        self.reap()?;

        self.failures.retain(|id, _| snapshot.wants_running(id));

        let mut workers = self.registry.lock()?;
        for (id, handle) in workers.iter_mut() {
            if !snapshot.wants_running(id) && !handle.stop_requested {
                log::info!("building {}: no longer desired, signalling stop", id);
                // A send error means the worker already exited; reaping handles it.
                let _ = handle.stop_tx.send(());
                handle.stop_requested = true;
            }
        }

        let now = Instant::now();
        let mut failed_spawns = Vec::new();
        for building in snapshot.desired_running() {
            if workers.contains_key(&building.id) {
                continue;
            }
            if let Some(record) = self.failures.get(&building.id) {
                match record.retry_at {
                    None => continue,
                    Some(at) if now < at => continue,
                    Some(_) => log::info!(
                        "building {}: restarting after {} failed start(s)",
                        building.id,
                        record.failures
                    ),
                }
            }
            match self.spawn(building) {
                Ok(handle) => {
                    workers.insert(building.id.clone(), handle);
                }
                Err(err) => {
                    log::error!("building {}: {:#}", building.id, err);
                    failed_spawns.push(building.id.clone());
                }
            }
        }

        for (id, handle) in workers.iter() {
            if matches!(handle.shared.state(), Ok(WorkerState::Running))
                && self.failures.remove(id).is_some()
            {
                log::info!("building {}: recovered", id);
            }
        }
        drop(workers);

        for id in failed_spawns {
            self.record_failure(&id);
        }
        Ok(())
    }

    /// Remove handles whose thread has finished and record failed starts.
    pub fn reap(&mut self) -> Result<Vec<(String, WorkerExit)>> {
        let finished: Vec<(String, WorkerHandle)> = {
            let mut workers = self.registry.lock()?;
            let ids: Vec<String> = workers
                .iter()
                .filter(|(_, h)| h.join.as_ref().map_or(true, |j| j.is_finished()))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| workers.remove(&id).map(|h| (id, h)))
                .collect()
        };

        let mut exits = Vec::with_capacity(finished.len());
        for (id, mut handle) in finished {
            let exit = match handle.join.take().map(|j| j.join()) {
                Some(Ok(exit)) => exit,
                Some(Err(_)) => {
                    let _ = handle.shared.set_state(WorkerState::Terminated);
                    WorkerExit::StartupFailed("worker thread panicked".to_string())
                }
                None => WorkerExit::Stopped,
            };
            match &exit {
                WorkerExit::Stopped => log::info!("building {}: worker reaped", id),
                WorkerExit::StartupFailed(reason) => {
                    log::warn!("building {}: worker failed: {}", id, reason);
                    if !handle.stop_requested {
                        self.record_failure(&id);
                    }
                }
            }
            exits.push((id, exit));
        }
        Ok(exits)
    }

    fn record_failure(&mut self, building_id: &str) {
        let record = self
            .failures
            .entry(building_id.to_string())
            .or_insert(FailureRecord {
                failures: 0,
                retry_at: None,
            });
        record.failures += 1;
        match self.config.restart.delay(record.failures) {
            Some(delay) => {
                let delay = with_jitter(delay);
                record.retry_at = Some(Instant::now() + delay);
                log::warn!("building {}: retrying in {:?}", building_id, delay);
            }
            None => {
                record.retry_at = None;
                log::warn!(
                    "building {}: restart disabled; waiting for the building to be switched off",
                    building_id
                );
            }
        }
    }

    fn spawn(&self, building: &BuildingConfig) -> Result<WorkerHandle> {
        let shared = Arc::new(WorkerShared::new());
        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = BuildingWorker::new(
            building.clone(),
            self.factory.clone(),
            self.client.clone(),
            shared.clone(),
            stop_rx,
            self.config.worker.clone(),
        );
        let join = thread::Builder::new()
            .name(format!("building-{}", building.id))
            .spawn(move || worker.run())
            .context("spawn worker thread")?;
        log::info!("building {}: worker spawned", building.id);
        Ok(WorkerHandle {
            config: building.clone(),
            shared,
            stop_tx,
            stop_requested: false,
            join: Some(join),
        })
    }
}
