use anyhow::Result;

use super::{TrackedBox, Tracker};
use crate::detect::{BoundingBox, Detection};

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Detections below this confidence neither start nor extend tracks.
    pub activation_threshold: f32,
    /// Frames a track survives without a match before it is dropped.
    pub lost_track_buffer: u32,
    /// Minimum IoU to associate a detection with an existing track.
    pub min_iou: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.25,
            lost_track_buffer: 30,
            min_iou: 0.2,
        }
    }
}

#[derive(Debug)]
struct Track {
    id: u64,
    bbox: BoundingBox,
    missed: u32,
}

/// Greedy IoU tracker.
///
/// Pairs are matched highest-IoU first; unmatched detections open new tracks
/// with sequential ids starting at 1. Ids are never reused.
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<TrackedBox>> {
        let active: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.activation_threshold)
            .collect();

        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in active.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.min_iou {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; active.len()];
        let mut out = Vec::with_capacity(active.len());

        for (_, ti, di) in pairs {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = active[di].bbox;
            track.missed = 0;
            out.push(TrackedBox::new(track.id, active[di].bbox));
        }

        for (track, taken) in self.tracks.iter_mut().zip(&track_taken) {
            if !taken {
                track.missed += 1;
            }
        }
        let lost_buffer = self.config.lost_track_buffer;
        self.tracks.retain(|t| t.missed <= lost_buffer);

        for (det, taken) in active.iter().zip(det_taken) {
            if taken {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                bbox: det.bbox,
                missed: 0,
            });
            out.push(TrackedBox::new(id, det.bbox));
        }

        Ok(out)
    }
}
