//! Per-building zone-crossing state machine.
//!
//! Each raw tracker id keeps its last centroid and zone membership. An entity
//! that is inside the zone and has a stable id counts as an ENTER when its
//! centroid moves from above the zone midline to on/below it, and as an EXIT
//! for the opposite move. A raw id seen for the first time never produces an
//! event.

use std::collections::HashMap;

use serde::Serialize;

use crate::detect::BoundingBox;
use crate::track::TrackedBox;
use crate::zone::Zone;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CrossingDirection {
    #[serde(rename = "IN")]
    Enter,
    #[serde(rename = "OUT")]
    Exit,
}

impl CrossingDirection {
    /// Direction label used on the reporting wire.
    pub fn as_wire(self) -> &'static str {
        match self {
            CrossingDirection::Enter => "IN",
            CrossingDirection::Exit => "OUT",
        }
    }
}

#[derive(Clone, Debug)]
struct TrackRecord {
    cy: f32,
    inside: bool,
    stable_id: Option<u64>,
    last_seen: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrossingEvent {
    pub tracker_id: u64,
    pub stable_id: u64,
    pub direction: CrossingDirection,
}

/// What the state machine concluded about one tracked box this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub tracker_id: u64,
    pub bbox: BoundingBox,
    pub inside: bool,
    pub stable_id: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub observations: Vec<Observation>,
    pub events: Vec<CrossingEvent>,
}

/// Crossing history for one building. Owned by exactly one worker.
#[derive(Debug)]
pub struct CrossingState {
    records: HashMap<u64, TrackRecord>,
    next_stable_id: u64,
    frame_index: u64,
    /// Records unseen for more than this many frames are dropped.
    eviction: Option<u64>,
}

impl CrossingState {
    /// `eviction_frames` of `None` (or `Some(0)`) keeps every record for the worker's lifetime.
    pub fn new(eviction_frames: Option<u64>) -> Self {
        Self {
            records: HashMap::new(),
            next_stable_id: 1,
            frame_index: 0,
            eviction: eviction_frames.filter(|n| *n > 0),
        }
    }

    /// Process the tracked boxes of one frame.
    pub fn observe(&mut self, zone: &Zone, tracks: &[TrackedBox]) -> FrameReport {
        self.frame_index += 1;
        let line_y = zone.midline();
        let mut report = FrameReport::default();

        for track in tracks {
            let (cx, cy) = track.bbox.centroid();
            let is_inside = zone.contains(cx, cy);

            let record = match self.records.get_mut(&track.tracker_id) {
                Some(record) => record,
                None => {
                    self.records.insert(
                        track.tracker_id,
                        TrackRecord {
                            cy,
                            inside: is_inside,
                            stable_id: None,
                            last_seen: self.frame_index,
                        },
                    );
                    report.observations.push(Observation {
                        tracker_id: track.tracker_id,
                        bbox: track.bbox,
                        inside: is_inside,
                        stable_id: None,
                    });
                    continue;
                }
            };

            if !record.inside && is_inside && record.stable_id.is_none() {
                record.stable_id = Some(self.next_stable_id);
                self.next_stable_id += 1;
            }

            if let (true, Some(stable_id)) = (is_inside, record.stable_id) {
                let pcy = record.cy;
                let direction = if pcy < line_y && cy >= line_y {
                    Some(CrossingDirection::Enter)
                } else if pcy > line_y && cy <= line_y {
                    Some(CrossingDirection::Exit)
                } else {
                    None
                };
                if let Some(direction) = direction {
                    report.events.push(CrossingEvent {
                        tracker_id: track.tracker_id,
                        stable_id,
                        direction,
                    });
                }
            }

            record.cy = cy;
            record.inside = is_inside;
            record.last_seen = self.frame_index;
            report.observations.push(Observation {
                tracker_id: track.tracker_id,
                bbox: track.bbox,
                inside: is_inside,
                stable_id: record.stable_id,
            });
        }

        if let Some(max_age) = self.eviction {
            let now = self.frame_index;
            self.records
                .retain(|_, record| now - record.last_seen <= max_age);
        }

        report
    }

    /// Number of raw tracker ids currently remembered.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }
}

/// Crossings accumulated since the last successful push, per direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub enter: u64,
    pub leave: u64,
}

impl Counters {
    pub fn record(&mut self, direction: CrossingDirection) {
        match direction {
            CrossingDirection::Enter => self.enter += 1,
            CrossingDirection::Exit => self.leave += 1,
        }
    }

    pub fn get(&self, direction: CrossingDirection) -> u64 {
        match direction {
            CrossingDirection::Enter => self.enter,
            CrossingDirection::Exit => self.leave,
        }
    }

    pub fn reset(&mut self, direction: CrossingDirection) {
        match direction {
            CrossingDirection::Enter => self.enter = 0,
            CrossingDirection::Exit => self.leave = 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.enter == 0 && self.leave == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::new(0.0, 50.0, 200.0, 150.0)
    }

    fn at(id: u64, cy: f32) -> TrackedBox {
        TrackedBox::new(id, BoundingBox::centered(100.0, cy, 20.0, 20.0))
    }

    fn run(state: &mut CrossingState, id: u64, ys: &[f32]) -> Counters {
        let mut counters = Counters::default();
        for &cy in ys {
            for event in state.observe(&zone(), &[at(id, cy)]).events {
                counters.record(event.direction);
            }
        }
        counters
    }

    #[test]
    fn downward_walk_counts_one_enter() {
        let mut state = CrossingState::new(None);
        let counters = run(&mut state, 7, &[40.0, 60.0, 90.0, 120.0]);
        assert_eq!(counters, Counters { enter: 1, leave: 0 });
    }

    #[test]
    fn stable_id_assigned_on_first_entry() {
        let mut state = CrossingState::new(None);
        let first = state.observe(&zone(), &[at(3, 40.0)]);
        assert_eq!(first.observations[0].stable_id, None);
        assert!(!first.observations[0].inside);

        let second = state.observe(&zone(), &[at(3, 60.0)]);
        assert_eq!(second.observations[0].stable_id, Some(1));
        assert!(second.observations[0].inside);
        assert!(second.events.is_empty());
    }

    #[test]
    fn upward_walk_counts_one_exit() {
        let mut state = CrossingState::new(None);
        let counters = run(&mut state, 1, &[160.0, 140.0, 110.0, 80.0, 40.0]);
        assert_eq!(counters, Counters { enter: 0, leave: 1 });
    }

    #[test]
    fn first_sighting_never_counts() {
        let mut state = CrossingState::new(None);
        // Already inside and below the line on the first frame.
        let report = state.observe(&zone(), &[at(9, 120.0)]);
        assert!(report.events.is_empty());
        assert_eq!(report.observations[0].stable_id, None);
    }

    #[test]
    fn entity_first_seen_inside_has_no_stable_id_and_never_counts() {
        let mut state = CrossingState::new(None);
        let counters = run(&mut state, 2, &[60.0, 90.0, 120.0, 140.0]);
        assert!(counters.is_zero());
    }

    #[test]
    fn landing_on_the_line_counts_only_on_the_way_down() {
        let mut state = CrossingState::new(None);
        let down = run(&mut state, 1, &[40.0, 60.0, 100.0]);
        assert_eq!(down, Counters { enter: 1, leave: 0 });

        let mut state = CrossingState::new(None);
        // Stays exactly on the line: no second event.
        let still = run(&mut state, 1, &[40.0, 60.0, 100.0, 100.0]);
        assert_eq!(still, Counters { enter: 1, leave: 0 });

        let mut state = CrossingState::new(None);
        let up = run(&mut state, 1, &[160.0, 140.0, 100.0]);
        assert_eq!(up, Counters { enter: 0, leave: 1 });
    }

    #[test]
    fn leaving_the_zone_before_the_line_does_not_count() {
        let mut state = CrossingState::new(None);
        let counters = run(&mut state, 1, &[40.0, 70.0, 30.0, 20.0]);
        assert!(counters.is_zero());
    }

    #[test]
    fn several_ids_in_one_frame_count_independently() {
        let mut state = CrossingState::new(None);
        let z = zone();
        state.observe(&z, &[at(1, 40.0), at(2, 160.0)]);
        state.observe(&z, &[at(1, 60.0), at(2, 140.0)]);
        let report = state.observe(&z, &[at(1, 110.0), at(2, 90.0)]);
        let mut counters = Counters::default();
        for event in &report.events {
            counters.record(event.direction);
        }
        assert_eq!(counters, Counters { enter: 1, leave: 1 });
        let stable: Vec<_> = report.observations.iter().map(|o| o.stable_id).collect();
        assert_eq!(stable, vec![Some(1), Some(2)]);
    }

    #[test]
    fn churned_id_starts_over() {
        let mut state = CrossingState::new(None);
        let z = zone();
        state.observe(&z, &[at(1, 40.0)]);
        state.observe(&z, &[at(1, 60.0)]);
        // The tracker loses the person and relabels them mid-zone.
        let report = state.observe(&z, &[at(5, 90.0)]);
        assert!(report.events.is_empty());
        let report = state.observe(&z, &[at(5, 120.0)]);
        assert!(report.events.is_empty());
    }

    #[test]
    fn stale_records_are_evicted_and_stable_ids_not_reused() {
        let mut state = CrossingState::new(Some(2));
        let z = zone();
        state.observe(&z, &[at(1, 40.0)]);
        let report = state.observe(&z, &[at(1, 60.0)]);
        assert_eq!(report.observations[0].stable_id, Some(1));

        state.observe(&z, &[]);
        state.observe(&z, &[]);
        assert_eq!(state.tracked(), 1);
        state.observe(&z, &[]);
        assert_eq!(state.tracked(), 0);

        // Same raw id reappearing is a new entity with a fresh stable id.
        let report = state.observe(&z, &[at(1, 60.0)]);
        assert!(report.events.is_empty());
        assert_eq!(report.observations[0].stable_id, None);
        state.observe(&z, &[at(1, 40.0)]);
        let report = state.observe(&z, &[at(1, 70.0)]);
        assert_eq!(report.observations[0].stable_id, Some(2));
    }

    #[test]
    fn zero_eviction_keeps_everything() {
        let mut state = CrossingState::new(Some(0));
        let z = zone();
        state.observe(&z, &[at(1, 40.0)]);
        for _ in 0..50 {
            state.observe(&z, &[]);
        }
        assert_eq!(state.tracked(), 1);
    }

    #[test]
    fn counters_reset_per_direction() {
        let mut counters = Counters::default();
        counters.record(CrossingDirection::Enter);
        counters.record(CrossingDirection::Enter);
        counters.record(CrossingDirection::Exit);
        assert_eq!(counters.get(CrossingDirection::Enter), 2);
        counters.reset(CrossingDirection::Enter);
        assert_eq!(counters, Counters { enter: 0, leave: 1 });
        assert!(!counters.is_zero());
        assert_eq!(CrossingDirection::Exit.as_wire(), "OUT");
    }
}
