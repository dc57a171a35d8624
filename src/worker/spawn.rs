//! Worker subprocess spawning.
//!
//! By default the supervisor re-executes its own binary with the hidden
//! `worker` subcommand. Any other program that honours the channel
//! contract can be launched instead, which is how the tests run small
//! shell workers.

use super::WorkerId;
use super::proc::Proc;
use crate::error::{PoolvisorError, Result};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Environment variable carrying the worker's `T-N` identity.
pub const WORKER_ID_ENV: &str = "POOLVISOR_WORKER_ID";

/// How a worker command line is assembled.
#[derive(Debug, Clone)]
enum LaunchMode {
    /// This binary in `worker` mode; identity and time unit go on the command line.
    SelfExec { time_unit_ms: u64 },
    /// An arbitrary program; identity is only passed through the environment.
    Command,
}

/// Spawns worker processes with piped command/completion channels.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    mode: LaunchMode,
}

impl WorkerLauncher {
    /// Launch workers by re-executing the current binary.
    pub fn current_exe(time_unit_ms: u64) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| PoolvisorError::Spawn {
            worker: "*".to_string(),
            source: e,
        })?;
        Ok(Self {
            program,
            args: vec![OsString::from("worker")],
            envs: Vec::new(),
            mode: LaunchMode::SelfExec { time_unit_ms },
        })
    }

    /// Launch workers with an arbitrary program and fixed arguments.
    pub fn command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(|a| a.as_ref().to_owned()).collect(),
            envs: Vec::new(),
            mode: LaunchMode::Command,
        }
    }

    /// Set an environment variable for every spawned worker.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Spawn one worker.
    ///
    /// stdin becomes the command channel and stdout the completion channel.
    /// stderr is inherited so worker logs reach the supervisor's log stream.
    pub fn spawn(&self, id: WorkerId) -> Result<Proc> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let LaunchMode::SelfExec { time_unit_ms } = self.mode {
            cmd.arg("--worker-type")
                .arg(id.worker_type.to_string())
                .arg("--worker-index")
                .arg(id.index.to_string())
                .arg("--time-unit-ms")
                .arg(time_unit_ms.to_string());
        }

        cmd.env(WORKER_ID_ENV, id.to_string());
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        // std creates these pipes close-on-exec, so no worker inherits a
        // sibling's channel and EOF reaches each worker at shutdown.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| PoolvisorError::Spawn {
            worker: id.to_string(),
            source: e,
        })?;

        Proc::from_child(child)
    }
}
