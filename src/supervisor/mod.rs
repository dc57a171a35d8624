//! The supervisor: one control thread owning the pool and its dispatch state.
//!
//! Lifecycle: [`Supervisor::start`] builds the pool, [`Supervisor::run`]
//! is the dispatch loop (`Running` until job input reaches EOF, then
//! `Draining`), and [`Supervisor::shutdown`] closes every channel, reaps
//! every worker and ends in `Terminated`. [`Supervisor::serve`] strings
//! the last two together.

mod dispatch;
mod shutdown;

pub use shutdown::{ShutdownReport, WorkerExit};

use crate::config::{Limits, WorkerDecl};
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::worker::WorkerLauncher;
use crate::input::PairReader;
use std::io::Read;
use std::os::unix::io::AsFd;
use tracing::info;

/// Dispatch loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Accepting jobs and completions.
    Running,
    /// Job input closed; shutdown pending.
    Draining,
    /// All workers reaped.
    Terminated,
}

/// Counters kept by the dispatch loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs written to a worker.
    pub jobs_dispatched: usize,
    /// Jobs turned away (malformed, out of range, no workers, worker gone).
    pub jobs_rejected: usize,
    /// Completion tokens drained from workers.
    pub jobs_completed: usize,
}

/// Owns the worker pool and everything the dispatch loop mutates.
#[derive(Debug)]
pub struct Supervisor {
    pool: WorkerPool,
    state: LoopState,
    stats: DispatchStats,
}

impl Supervisor {
    /// Wrap an already built pool.
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            state: LoopState::Running,
            stats: DispatchStats::default(),
        }
    }

    /// Build the pool from declarations and enter `Running`.
    pub fn start(decls: &[WorkerDecl], limits: Limits, launcher: &WorkerLauncher) -> Result<Self> {
        let pool = WorkerPool::build(decls, limits, launcher)?;
        Ok(Self::new(pool))
    }

    /// The worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Run the dispatch loop to end of input, then shut down.
    ///
    /// Shutdown happens even when the loop fails, so no worker outlives
    /// the supervisor; the loop's error is returned afterwards.
    pub fn serve<R: Read + AsFd>(mut self, input: &mut PairReader<R>) -> Result<ShutdownReport> {
        info!(workers = self.pool.worker_count(), "Dispatching jobs");
        let outcome = self.run(input);
        let report = self.shutdown();
        outcome.map(|()| report)
    }
}
