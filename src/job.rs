//! Jobs and the reasons a job can be turned away.

use crate::config::Limits;
use crate::input::Entry;
use crate::worker::WorkerId;
use thiserror::Error;

/// A `(type, duration)` request routed to exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    /// Target worker type.
    pub worker_type: usize,
    /// Duration in time units.
    pub duration: u32,
}

/// Why a job was not dispatched.
///
/// These are recoverable: the dispatch loop logs them and moves on without
/// touching any rotation cursor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobRejection {
    #[error("Malformed job input: '{0}' (expected 'type duration')")]
    Malformed(String),

    #[error("Invalid job type: {value} (must be 1-{max})")]
    InvalidType { value: i64, max: usize },

    #[error("Invalid job duration: {value} (must be 1-{max})")]
    InvalidDuration { value: i64, max: u32 },

    #[error("No workers available for job type {0}")]
    NoWorkers(usize),

    #[error("Worker {worker} is gone: {reason}")]
    WorkerGone { worker: WorkerId, reason: String },
}

impl Job {
    /// Turn one input entry into a job.
    ///
    /// Checks run in order: shape, type range, duration range. Capacity is
    /// checked later against the pool.
    pub fn from_entry(entry: Entry, limits: &Limits) -> Result<Self, JobRejection> {
        match entry {
            Entry::Pair(worker_type, duration) => Self::checked(worker_type, duration, limits),
            Entry::Malformed(text) => Err(JobRejection::Malformed(text)),
        }
    }

    /// Build a job from raw values, range-checking type then duration.
    pub fn checked(worker_type: i64, duration: i64, limits: &Limits) -> Result<Self, JobRejection> {
        if worker_type < 1 || worker_type > limits.max_types as i64 {
            return Err(JobRejection::InvalidType {
                value: worker_type,
                max: limits.max_types,
            });
        }
        if duration < 1 || duration > i64::from(limits.max_job_duration) {
            return Err(JobRejection::InvalidDuration {
                value: duration,
                max: limits.max_job_duration,
            });
        }

        Ok(Self {
            worker_type: worker_type as usize,
            duration: duration as u32,
        })
    }

    /// Re-check a job that may have been built by hand.
    pub fn validate(&self, limits: &Limits) -> Result<(), JobRejection> {
        Self::checked(self.worker_type as i64, i64::from(self.duration), limits).map(|_| ())
    }
}
