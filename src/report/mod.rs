//! Control and reporting collaborator.
//!
//! The control backend publishes the desired state of every building and
//! accepts count updates. Workers push; only the supervisor polls.

mod client;

use anyhow::Result;
use serde::Serialize;

use crate::building::ControlSnapshot;
use crate::crossing::CrossingDirection;

pub use client::{HttpReportingClient, ReportingConfig};

/// One count update. Exactly one of `enter_count`/`leave_count` is non-zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountUpdate {
    pub building_id: String,
    pub direction: CrossingDirection,
    pub enter_count: u64,
    pub leave_count: u64,
}

impl CountUpdate {
    pub fn new(building_id: &str, direction: CrossingDirection, count: u64) -> Self {
        let (enter_count, leave_count) = match direction {
            CrossingDirection::Enter => (count, 0),
            CrossingDirection::Exit => (0, count),
        };
        Self {
            building_id: building_id.to_string(),
            direction,
            enter_count,
            leave_count,
        }
    }
}

pub trait ReportingClient: Send + Sync {
    /// Desired state of every building.
    ///
    /// `Err` means the control plane could not be reached; callers must leave
    /// running work untouched.
    fn fetch_control(&self) -> Result<ControlSnapshot>;

    /// Push one update. `Ok` only for a 2xx response.
    fn push_update(&self, update: &CountUpdate) -> Result<()>;
}
