//! Orderly shutdown: close every channel, then reap every worker.

use super::{DispatchStats, LoopState, Supervisor};
use crate::worker::WorkerId;
use crate::worker::signals::{TerminationReason, analyze_wait_status};
use tracing::{debug, info, warn};

/// How one worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub worker: WorkerId,
    pub reason: TerminationReason,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers waited on during this shutdown.
    pub workers_reaped: usize,
    /// Dispatch counters at the time of shutdown.
    pub stats: DispatchStats,
    /// Per-worker exit, type-major order.
    pub exits: Vec<WorkerExit>,
}

impl ShutdownReport {
    /// Whether every worker exited with status 0.
    pub fn all_clean(&self) -> bool {
        self.exits.iter().all(|e| e.reason.is_success())
    }
}

impl Supervisor {
    /// Close all channels and wait for every worker to exit.
    ///
    /// All command channels are closed before the first wait, so workers
    /// wind down in parallel. Workers that already exited, or that cannot
    /// be waited on, do not stop the others from being reaped. Calling this
    /// again after `Terminated` reaps nothing.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.state != LoopState::Terminated {
            debug!(workers = self.pool.worker_count(), "Closing worker channels");
        }
        for worker in self.pool.workers_mut() {
            worker.proc_mut().close_channels();
        }

        let mut exits = Vec::new();
        for worker in self.pool.workers_mut() {
            if worker.proc().is_reaped() {
                continue;
            }
            let id = worker.id();
            let reason = match worker.proc_mut().wait() {
                Ok(status) => analyze_wait_status(status),
                Err(e) => {
                    debug!(worker = %id, error = %e, "Could not wait for worker");
                    TerminationReason::Vanished
                }
            };

            if matches!(reason, TerminationReason::Exited(0) | TerminationReason::Vanished) {
                debug!(worker = %id, reason = %reason, "Worker {} {}", id, reason);
            } else {
                warn!(worker = %id, reason = %reason, "Worker {} {}", id, reason);
            }
            exits.push(WorkerExit { worker: id, reason });
        }

        let report = ShutdownReport {
            workers_reaped: exits.len(),
            stats: self.stats,
            exits,
        };

        if self.state != LoopState::Terminated {
            self.state = LoopState::Terminated;
            info!(
                workers_reaped = report.workers_reaped,
                dispatched = report.stats.jobs_dispatched,
                rejected = report.stats.jobs_rejected,
                completed = report.stats.jobs_completed,
                "All workers finished. System shutdown complete."
            );
        }
        report
    }
}
