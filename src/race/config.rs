//! Race parameters and kernel object handles handed to every participant.

use crate::error::{RaceError, Result};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Index of a worker in `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifiers of the three SysV objects a run shares.
///
/// These are plain integers valid host-wide, so they are passed to child
/// processes on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHandles {
    pub queue_id: i32,
    pub sem_id: i32,
    pub shm_id: i32,
}

/// Parameters of one race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceConfig {
    /// Number of worker processes (N).
    pub workers: u32,
    /// Reports a worker must land to win (R).
    pub target: u32,
    /// Leader scores that are multiples of this are announced.
    pub milestone: u32,
    /// Upper bound of the per-report jitter.
    pub max_delay: Duration,
    /// How long stragglers get once the race is decided.
    pub grace: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            workers: 12,
            target: 100,
            milestone: 5,
            max_delay: Duration::from_micros(398),
            grace: Duration::from_secs(2),
        }
    }
}

impl RaceConfig {
    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_target(mut self, target: u32) -> Self {
        self.target = target;
        self
    }

    pub fn with_milestone(mut self, milestone: u32) -> Self {
        self.milestone = milestone;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Total reports the supervisor will consume before giving up on a winner.
    pub fn exhaustion_bound(&self) -> u64 {
        u64::from(self.target) * u64::from(self.workers)
    }

    /// Reject parameters that cannot produce a race.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RaceError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }
        if self.target == 0 {
            return Err(RaceError::InvalidConfig("target must be positive".into()));
        }
        if self.milestone == 0 {
            return Err(RaceError::InvalidConfig(
                "milestone must be positive".into(),
            ));
        }
        if self.exhaustion_bound() > u64::from(u32::MAX) {
            return Err(RaceError::InvalidConfig(format!(
                "{} workers x {} reports overflows the report counter",
                self.workers, self.target
            )));
        }
        Ok(())
    }
}
