//! Worker pool: fixed groups of workers selected round-robin per type.
//!
//! The pool is sized once from the declarations and never grows. Each
//! declared type owns a [`WorkerGroup`] with its own [`RotationCursor`];
//! undeclared types have capacity 0 and accept no jobs.

use crate::config::{Limits, WorkerDecl};
use crate::error::{PoolvisorError, Result};
use crate::worker::{Proc, WorkerId, WorkerLauncher};
use std::time::Duration;
use tracing::{debug, info};

/// Time abandoned workers get to exit on SIGTERM before they are killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(10);

/// Round-robin cursor over `capacity` slots.
///
/// Invariant: `0 <= next < capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationCursor {
    next: usize,
    capacity: usize,
}

impl RotationCursor {
    /// Create a cursor at slot 0. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rotation cursor needs at least one slot");
        Self { next: 0, capacity }
    }

    /// Slot the next call to [`advance`](Self::advance) will return.
    pub fn peek(&self) -> usize {
        self.next
    }

    /// Return the current slot and move to the following one.
    pub fn advance(&mut self) -> usize {
        let current = self.next;
        self.next = (self.next + 1) % self.capacity;
        current
    }
}

/// A single live worker in the pool.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    proc: Proc,
    /// Jobs written to this worker's command channel.
    pub jobs_dispatched: usize,
    /// Completion tokens received from this worker.
    pub jobs_completed: usize,
}

impl Worker {
    fn new(id: WorkerId, proc: Proc) -> Self {
        Self {
            id,
            proc,
            jobs_dispatched: 0,
            jobs_completed: 0,
        }
    }

    /// Worker identity.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Process handle and channels.
    pub fn proc(&self) -> &Proc {
        &self.proc
    }

    /// Mutable process handle and channels.
    pub fn proc_mut(&mut self) -> &mut Proc {
        &mut self.proc
    }

    /// Jobs dispatched but not yet acknowledged.
    ///
    /// Informational only; dispatch never consults it.
    pub fn outstanding(&self) -> usize {
        self.jobs_dispatched.saturating_sub(self.jobs_completed)
    }
}

/// All workers of one type plus their rotation cursor.
#[derive(Debug)]
pub struct WorkerGroup {
    workers: Vec<Worker>,
    cursor: RotationCursor,
}

impl WorkerGroup {
    /// Number of workers, fixed at build time.
    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    /// Index of the worker that receives the next job.
    pub fn next_index(&self) -> usize {
        self.cursor.peek()
    }

    /// Workers in index order.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Pick the worker at the cursor and advance the cursor.
    pub fn select(&mut self) -> &mut Worker {
        let index = self.cursor.advance();
        &mut self.workers[index]
    }
}

/// Fixed-capacity registry of worker groups, indexed by type.
#[derive(Debug)]
pub struct WorkerPool {
    /// Slot `t - 1` holds type `t`; `None` means capacity 0.
    groups: Vec<Option<WorkerGroup>>,
    limits: Limits,
}

impl WorkerPool {
    /// Spawn every declared worker.
    ///
    /// Either all groups come up or an error is returned; workers spawned
    /// before a failure are killed and reaped when the partial pool drops.
    pub fn build(decls: &[WorkerDecl], limits: Limits, launcher: &WorkerLauncher) -> Result<Self> {
        if decls.len() > limits.max_types {
            return Err(PoolvisorError::Config(format!(
                "{} declarations exceed the limit of {} worker types",
                decls.len(),
                limits.max_types
            )));
        }

        let mut pool = Self {
            groups: (0..limits.max_types).map(|_| None).collect(),
            limits,
        };

        for decl in decls {
            pool.add_group(decl, launcher)?;
        }

        info!(
            types = pool.groups.iter().flatten().count(),
            workers = pool.worker_count(),
            "Worker configuration complete. Ready to accept jobs."
        );
        Ok(pool)
    }

    fn add_group(&mut self, decl: &WorkerDecl, launcher: &WorkerLauncher) -> Result<()> {
        let WorkerDecl { worker_type, count } = *decl;
        if worker_type < 1 || worker_type > self.limits.max_types {
            return Err(PoolvisorError::Config(format!(
                "Invalid worker type: {} (must be 1-{})",
                worker_type, self.limits.max_types
            )));
        }
        if count < 1 || count > self.limits.max_workers_per_type {
            return Err(PoolvisorError::Config(format!(
                "Invalid worker count: {} for type {} (must be 1-{})",
                count, worker_type, self.limits.max_workers_per_type
            )));
        }
        if self.groups[worker_type - 1].is_some() {
            return Err(PoolvisorError::Config(format!(
                "Duplicate worker type: {}",
                worker_type
            )));
        }

        info!(
            worker_type,
            count,
            "Creating {} workers of type {}...",
            count,
            worker_type
        );

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let id = WorkerId { worker_type, index };
            let proc = launcher.spawn(id)?;
            debug!(worker = %id, pid = proc.pid().as_raw(), "Spawned worker");
            workers.push(Worker::new(id, proc));
        }

        self.groups[worker_type - 1] = Some(WorkerGroup {
            workers,
            cursor: RotationCursor::new(count),
        });
        Ok(())
    }

    /// Bounds this pool was built with.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Number of workers registered for `worker_type` (0 if undeclared or out of range).
    pub fn capacity(&self, worker_type: usize) -> usize {
        self.group(worker_type).map_or(0, WorkerGroup::capacity)
    }

    /// Group for `worker_type`, if declared.
    pub fn group(&self, worker_type: usize) -> Option<&WorkerGroup> {
        worker_type
            .checked_sub(1)
            .and_then(|slot| self.groups.get(slot))
            .and_then(Option::as_ref)
    }

    /// Mutable group for `worker_type`, if declared.
    pub fn group_mut(&mut self, worker_type: usize) -> Option<&mut WorkerGroup> {
        worker_type
            .checked_sub(1)
            .and_then(|slot| self.groups.get_mut(slot))
            .and_then(Option::as_mut)
    }

    /// Total number of workers across all types.
    pub fn worker_count(&self) -> usize {
        self.groups.iter().flatten().map(WorkerGroup::capacity).sum()
    }

    /// All workers, type-major then index-minor.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.groups.iter().flatten().flat_map(|g| g.workers.iter())
    }

    /// All workers mutably, type-major then index-minor.
    pub fn workers_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.groups
            .iter_mut()
            .flatten()
            .flat_map(|g| g.workers.iter_mut())
    }

    /// Look up one worker.
    pub fn worker_mut(&mut self, id: WorkerId) -> Option<&mut Worker> {
        self.group_mut(id.worker_type)
            .and_then(|g| g.workers.get_mut(id.index))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Normal shutdown reaps everything first. Otherwise signal every
        // live worker, then wait once; each `Proc` drop reaps or kills.
        let mut signalled = 0;
        for worker in self.workers_mut() {
            let proc = worker.proc_mut();
            if proc.is_reaped() {
                continue;
            }
            proc.close_channels();
            if proc.terminate().is_ok() {
                signalled += 1;
            }
        }
        if signalled > 0 {
            debug!(workers = signalled, "Terminating abandoned workers");
            std::thread::sleep(TERMINATE_GRACE);
        }
    }
}
