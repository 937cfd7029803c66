//! Multi-building doorway people counter.
//!
//! Each running building gets a worker thread that decodes its video, detects
//! and tracks people, and counts crossings of the doorway zone's midline.
//! Counts are pushed to a remote control backend, which also decides which
//! buildings run.
//!
//! # Module Structure
//!
//! - `building`, `zone`: control-plane data (desired state, doorway geometry)
//! - `ingest`, `detect`, `track`: the per-building pipeline collaborators
//! - `crossing`: per-entity zone-crossing state machine and counters
//! - `worker`, `supervisor`: building worker lifecycle and the registry
//! - `report`: control poll and count push
//! - `render`, `frame`, `api`: annotated frames and the live stream/health API
//! - `config`: `counterd` configuration

pub mod api;
pub mod building;
pub mod config;
pub mod crossing;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod supervisor;
pub mod track;
pub mod worker;
pub mod zone;

pub use building::{validate_building_id, BuildingConfig, ControlSnapshot};
pub use crossing::{Counters, CrossingDirection, CrossingEvent, CrossingState, FrameReport, Observation};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend};
pub use frame::{Frame, FrameSlot};
pub use ingest::{FileConfig, FileSource, FrameSource, SourceStats};
pub use pipeline::{LocalPipelineFactory, Pipeline, PipelineFactory};
pub use report::{CountUpdate, HttpReportingClient, ReportingClient, ReportingConfig};
pub use supervisor::{Registry, RestartPolicy, Supervisor, SupervisorConfig, WorkerStatus};
pub use track::{IouTracker, TrackedBox, Tracker, TrackerConfig};
pub use worker::{BuildingWorker, WorkerExit, WorkerSettings, WorkerShared, WorkerState};
pub use zone::Zone;
