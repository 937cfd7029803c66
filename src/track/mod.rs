//! Per-building object trackers.
//!
//! A tracker relabels each frame's detections with local tracking ids that try
//! to stay continuous across frames. Ids are only meaningful within one tracker
//! instance and may churn on occlusion; the crossing state machine copes with that.

mod iou;

use anyhow::Result;

use crate::detect::{BoundingBox, Detection};

pub use iou::{IouTracker, TrackerConfig};

/// A detection relabelled with the tracker's id.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedBox {
    pub tracker_id: u64,
    pub bbox: BoundingBox,
}

impl TrackedBox {
    pub fn new(tracker_id: u64, bbox: BoundingBox) -> Self {
        Self { tracker_id, bbox }
    }
}

pub trait Tracker: Send {
    /// Associate this frame's detections with existing tracks.
    ///
    /// Returns only the tracks matched or created in this frame.
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<TrackedBox>>;
}
