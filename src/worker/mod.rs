//! Worker subprocesses and their channels.
//!
//! Every worker is a separate process connected to the supervisor by two
//! one-directional pipes. Nothing else is shared, so the supervisor needs
//! no locks to coordinate them.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │    Supervisor    │
//!                     │ (dispatch loop)  │
//!                     └────────┬─────────┘
//!          command (stdin) ▼   │   ▲ completion (stdout)
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1-0│  │ Worker 1-1│  │ Worker T-N│
//!         │ (process) │  │ (process) │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Channel contract
//!
//! - The command channel carries one JSON line per job.
//! - The completion channel carries the 4-byte token `done` per finished job.
//! - EOF on the command channel tells the worker to exit.

pub mod ipc;
pub mod proc;
pub mod protocol;
pub mod signals;
pub mod spawn;
pub mod worker_main;

pub use proc::{CompletionRead, Proc};
pub use protocol::{COMPLETION_TOKEN, WorkRequest};
pub use spawn::WorkerLauncher;
pub use worker_main::{WorkerOptions, run_worker_main};

use std::fmt;

/// Identity of one worker: its type and its index within the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId {
    /// Worker type, in `1..=MAX_TYPES`.
    pub worker_type: usize,
    /// Index within the type, in `0..capacity`.
    pub index: usize,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.worker_type, self.index)
    }
}
