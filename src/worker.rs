//! Building worker: one thread per running building.
//!
//! `Starting → Running → Stopping → Terminated`. The worker owns its pipeline,
//! crossing state and counters; only the latest annotated frame and the state
//! are shared, through `WorkerShared`.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::building::BuildingConfig;
use crate::crossing::{CrossingDirection, CrossingState, Counters};
use crate::frame::{Frame, FrameSlot};
use crate::ingest::FrameSource;
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::render::Annotator;
use crate::report::{CountUpdate, ReportingClient};
use crate::zone::Zone;

/// Wait between attempts when a source yields nothing even after a rewind.
const EMPTY_SOURCE_RETRY: Duration = Duration::from_millis(100);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// How a worker thread ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    StartupFailed(String),
}

/// State a worker exposes to the supervisor and the stream API.
#[derive(Debug)]
pub struct WorkerShared {
    frame: FrameSlot,
    state: Mutex<WorkerState>,
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self {
            frame: FrameSlot::new(),
            state: Mutex::new(WorkerState::Starting),
        }
    }
}

impl WorkerShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> &FrameSlot {
        &self.frame
    }

    pub fn state(&self) -> Result<WorkerState> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|_| anyhow!("worker state lock poisoned"))
    }

    pub fn set_state(&self, state: WorkerState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("worker state lock poisoned"))?;
        *guard = state;
        Ok(())
    }

    /// True until the worker has terminated.
    pub fn is_active(&self) -> bool {
        !matches!(self.state(), Ok(WorkerState::Terminated) | Err(_))
    }
}

#[derive(Clone)]
pub struct WorkerSettings {
    /// Interval between counter flushes.
    pub report_interval: Duration,
    /// Pacing used when the source does not report a frame interval.
    pub fallback_frame_interval: Duration,
    pub flip_horizontal: bool,
    /// Forget raw tracker ids unseen for this many frames. `None` keeps them all.
    pub track_eviction_frames: Option<u64>,
    pub annotator: Annotator,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(10),
            fallback_frame_interval: Duration::from_secs_f64(1.0 / 30.0),
            flip_horizontal: false,
            track_eviction_frames: Some(900),
            annotator: Annotator::new(),
        }
    }
}

pub struct BuildingWorker {
    building: BuildingConfig,
    factory: Arc<dyn PipelineFactory>,
    client: Arc<dyn ReportingClient>,
    shared: Arc<WorkerShared>,
    stop_rx: Receiver<()>,
    settings: WorkerSettings,
}

impl BuildingWorker {
    pub fn new(
        building: BuildingConfig,
        factory: Arc<dyn PipelineFactory>,
        client: Arc<dyn ReportingClient>,
        shared: Arc<WorkerShared>,
        stop_rx: Receiver<()>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            building,
            factory,
            client,
            shared,
            stop_rx,
            settings,
        }
    }

    /// Run until a stop signal arrives (or the stop channel disconnects).
    pub fn run(self) -> WorkerExit {
        let id = self.building.id.clone();
        self.set_state(WorkerState::Starting);

        let mut pipeline = match self.factory.open(&self.building) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log::error!("building {}: failed to start: {:#}", id, err);
                self.set_state(WorkerState::Terminated);
                return WorkerExit::StartupFailed(format!("{:#}", err));
            }
        };

        log::info!(
            "building {}: started on {} (detector {}, direction {})",
            id,
            pipeline.source.describe(),
            pipeline.detector.name(),
            self.building.direction.as_deref().unwrap_or("unset")
        );
        self.set_state(WorkerState::Running);

        let mut counters = self.run_loop(&mut pipeline);

        self.set_state(WorkerState::Stopping);
        log::info!("building {}: stopping", id);
        if !counters.is_zero() {
            if let Err(err) = flush_counters(self.client.as_ref(), &id, &mut counters) {
                log::warn!(
                    "building {}: final flush failed, dropping {} ENTER / {} EXIT: {:#}",
                    id,
                    counters.enter,
                    counters.leave,
                    err
                );
            }
        }
        if let Err(err) = self.shared.frame().clear() {
            log::warn!("building {}: {:#}", id, err);
        }
        drop(pipeline);
        self.set_state(WorkerState::Terminated);
        log::info!("building {}: stopped", id);
        WorkerExit::Stopped
    }

    fn run_loop(&self, pipeline: &mut Pipeline) -> Counters {
        let id = self.building.id.as_str();
        let frame_interval = pipeline
            .source
            .frame_interval()
            .unwrap_or(self.settings.fallback_frame_interval);

        let mut counters = Counters::default();
        let mut crossing = CrossingState::new(self.settings.track_eviction_frames);
        let mut last_flush = Instant::now();
        let mut last_health = Instant::now();
        let mut frames_processed = 0u64;

        loop {
            let started = Instant::now();
            let pause = match next_frame(pipeline.source.as_mut(), id) {
                Some(frame) => {
                    self.process_frame(frame, pipeline, &mut crossing, &mut counters);
                    frames_processed += 1;
                    frame_interval.saturating_sub(started.elapsed())
                }
                None => EMPTY_SOURCE_RETRY,
            };

            if last_flush.elapsed() >= self.settings.report_interval {
                if !counters.is_zero() {
                    if let Err(err) = flush_counters(self.client.as_ref(), id, &mut counters) {
                        log::warn!("{:#}; retrying next interval", err);
                    }
                }
                last_flush = Instant::now();
            }

            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                let source = pipeline.source.stats();
                log::debug!(
                    "building {}: {} frames processed ({} read, {} rewinds), {} tracks held, pending {} ENTER / {} EXIT",
                    id,
                    frames_processed,
                    source.frames_read,
                    source.rewinds,
                    crossing.tracked(),
                    counters.enter,
                    counters.leave
                );
                last_health = Instant::now();
            }

            if wait_for_stop(&self.stop_rx, pause) {
                return counters;
            }
        }
    }

    fn process_frame(
        &self,
        mut frame: Frame,
        pipeline: &mut Pipeline,
        crossing: &mut CrossingState,
        counters: &mut Counters,
    ) {
        let id = self.building.id.as_str();
        if self.settings.flip_horizontal {
            frame.flip_horizontal();
        }
        let zone = self
            .building
            .roi
            .unwrap_or_else(|| Zone::default_for_frame(frame.width(), frame.height()));

        let detections = match pipeline.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!(
                    "building {}: detection failed on frame {}: {:#}",
                    id,
                    frame.index(),
                    err
                );
                return;
            }
        };
        let tracks = match pipeline.tracker.update(&detections) {
            Ok(tracks) => tracks,
            Err(err) => {
                log::warn!(
                    "building {}: tracking failed on frame {}: {:#}",
                    id,
                    frame.index(),
                    err
                );
                return;
            }
        };

        let report = crossing.observe(&zone, &tracks);
        for event in &report.events {
            counters.record(event.direction);
            match event.direction {
                CrossingDirection::Enter => {
                    log::info!("building {}: ENTER counted (id {})", id, event.stable_id)
                }
                CrossingDirection::Exit => {
                    log::info!("building {}: EXIT counted (id {})", id, event.stable_id)
                }
            }
        }

        self.settings
            .annotator
            .annotate(&mut frame, id, &zone, &report.observations);
        if let Err(err) = self.shared.frame().publish(frame) {
            log::warn!("building {}: {:#}", id, err);
        }
    }

    fn set_state(&self, state: WorkerState) {
        if let Err(err) = self.shared.set_state(state) {
            log::warn!("building {}: {:#}", self.building.id, err);
        }
    }
}

/// Next frame, looping the source when it runs out. `None` skips this iteration.
fn next_frame(source: &mut dyn FrameSource, building_id: &str) -> Option<Frame> {
    match source.next_frame() {
        Ok(Some(frame)) => return Some(frame),
        Ok(None) => {}
        Err(err) => {
            log::warn!("building {}: frame read failed: {:#}", building_id, err);
            if let Err(err) = source.rewind() {
                log::warn!("building {}: rewind failed: {:#}", building_id, err);
            }
            return None;
        }
    }

    if let Err(err) = source.rewind() {
        log::warn!("building {}: rewind failed: {:#}", building_id, err);
        return None;
    }
    match source.next_frame() {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("building {}: frame read failed: {:#}", building_id, err);
            None
        }
    }
}

/// Block for up to `timeout`; true when the worker should stop.
fn wait_for_stop(stop_rx: &Receiver<()>, timeout: Duration) -> bool {
    match stop_rx.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

/// Push every non-zero direction and reset it once its own push succeeded.
///
/// A direction whose push failed keeps its count; the error lists the failures.
pub fn flush_counters(
    client: &dyn ReportingClient,
    building_id: &str,
    counters: &mut Counters,
) -> Result<()> {
    let mut failures = Vec::new();
    for direction in [CrossingDirection::Enter, CrossingDirection::Exit] {
        let count = counters.get(direction);
        if count == 0 {
            continue;
        }
        let update = CountUpdate::new(building_id, direction, count);
        match client.push_update(&update) {
            Ok(()) => {
                counters.reset(direction);
                log::info!(
                    "building {}: reported {} {}",
                    building_id,
                    count,
                    direction.as_wire()
                );
            }
            Err(err) => failures.push(format!("{}: {:#}", direction.as_wire(), err)),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "building {}: count update failed ({})",
            building_id,
            failures.join("; ")
        ))
    }
}
