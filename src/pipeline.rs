//! Per-building processing pipeline: frame source, detector and tracker.
//!
//! A `PipelineFactory` builds a fresh pipeline for every worker start, so no
//! detector or tracker state is ever shared between buildings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::building::BuildingConfig;
use crate::detect::{BackendRegistry, DetectorBackend};
use crate::ingest::{resolve_video_path, FileConfig, FileSource, FrameSource};
use crate::track::{IouTracker, Tracker};

pub struct Pipeline {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn DetectorBackend>,
    pub tracker: Box<dyn Tracker>,
}

pub trait PipelineFactory: Send + Sync {
    /// Open everything a worker needs. An error is fatal to that worker.
    fn open(&self, building: &BuildingConfig) -> Result<Pipeline>;
}

/// Opens videos from a local directory and detectors from a backend registry.
pub struct LocalPipelineFactory {
    videos_dir: PathBuf,
    registry: Arc<BackendRegistry>,
    detector: String,
}

impl LocalPipelineFactory {
    pub fn new(videos_dir: impl Into<PathBuf>, registry: Arc<BackendRegistry>, detector: &str) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            registry,
            detector: detector.to_string(),
        }
    }
}

impl PipelineFactory for LocalPipelineFactory {
    fn open(&self, building: &BuildingConfig) -> Result<Pipeline> {
        let video_ref = building
            .video_path
            .as_deref()
            .ok_or_else(|| anyhow!("no video path configured"))?;
        let path = resolve_video_path(&self.videos_dir, video_ref)?;
        let source = FileSource::open(FileConfig::new(path))
            .with_context(|| format!("open video {}", video_ref))?;

        let mut detector = self
            .registry
            .create(&self.detector)
            .with_context(|| format!("create detector {}", self.detector))?;
        detector.warm_up().context("warm up detector")?;

        Ok(Pipeline {
            source: Box::new(source),
            detector,
            tracker: Box::new(IouTracker::default()),
        })
    }
}
