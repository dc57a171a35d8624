//! Worker subprocess main entry point.
//!
//! This module runs when `poolvisor worker` is invoked by the supervisor.
//! It reads one request at a time from stdin, performs the job, and writes
//! a completion token to stdout before reading the next request.

use super::WorkerId;
use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{COMPLETION_TOKEN, WorkRequest};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{error, info};

/// Runtime options for a worker process.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Identity used in log lines.
    pub id: WorkerId,
    /// Wall-clock length of one duration unit.
    pub time_unit: Duration,
}

/// Perform the job body: wait for `duration` time units.
fn run_job(options: &WorkerOptions, duration: u32) {
    info!(
        worker = %options.id,
        duration,
        "Worker {}: Starting job (duration: {})",
        options.id,
        duration
    );
    std::thread::sleep(options.time_unit * duration);
    info!(worker = %options.id, "Worker {}: Job completed", options.id);
}

/// Worker main loop.
///
/// Returns the number of jobs completed once the command channel reaches
/// EOF, or once the supervisor stops listening for completions; queued
/// requests are dropped in that case. An undecodable request is fatal to
/// this worker.
pub fn worker_loop<R: Read, W: Write>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
    options: &WorkerOptions,
) -> io::Result<usize> {
    let mut completed = 0;

    while let Some(line) = reader.read_line()? {
        if line.trim().is_empty() {
            continue;
        }

        let request = WorkRequest::from_line(&line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid request '{}': {}", line, e),
            )
        })?;

        match request {
            WorkRequest::Run { duration } => {
                run_job(options, duration);
                completed += 1;
                match writer.write_all(COMPLETION_TOKEN) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        info!(
                            worker = %options.id,
                            "Worker {}: supervisor closed completion channel; abandoning remaining jobs",
                            options.id
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(completed)
}

/// Run the worker subprocess main function.
///
/// Exits 0 when the supervisor closes the command channel, 1 on any
/// channel error.
pub fn run_worker_main(options: WorkerOptions) -> ! {
    // Ignore SIGPIPE - a vanished supervisor surfaces as an io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let channels = PipeFd::stdin().and_then(|stdin| Ok((stdin, PipeFd::stdout()?)));
    let (stdin_fd, stdout_fd) = match channels {
        Ok(fds) => fds,
        Err(e) => {
            error!(worker = %options.id, error = %e, "Worker {}: cannot open channels", options.id);
            std::process::exit(1);
        }
    };

    let mut reader = LineReader::new(stdin_fd);
    let mut writer = LineWriter::new(stdout_fd);

    match worker_loop(&mut reader, &mut writer, &options) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            error!(worker = %options.id, error = %e, "Worker {}: read failed", options.id);
            std::process::exit(1);
        }
    }
}
