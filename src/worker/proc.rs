//! Process handle for worker subprocesses.
//!
//! Wraps a child process with its two channels: the command channel
//! (the child's stdin) and the completion channel (the child's stdout).

use super::ipc::{LineWriter, PipeFd};
use super::protocol::{CompletionDecoder, WorkRequest};
use crate::error::{PoolvisorError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};

/// Outcome of draining a ready completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRead {
    /// Number of whole completion tokens received.
    Tokens(usize),
    /// The worker closed its end of the channel.
    Closed,
}

/// Handle to a worker subprocess with IPC channels.
#[derive(Debug)]
pub struct Proc {
    /// Process ID
    pid: Pid,
    /// Writer for the command channel (None once closed)
    writer: Option<LineWriter<PipeFd>>,
    /// Read end of the completion channel (None once closed)
    reader: Option<PipeFd>,
    /// Carries partial completion tokens between reads
    decoder: CompletionDecoder,
    /// Whether the process has been reaped
    reaped: bool,
}

impl Proc {
    /// Create a new process handle from its components.
    ///
    /// # Arguments
    /// * `pid` - The process ID
    /// * `stdin` - Write end of the command channel
    /// * `stdout` - Read end of the completion channel
    pub fn new(pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            pid,
            writer: Some(LineWriter::new(stdin)),
            reader: Some(stdout),
            decoder: CompletionDecoder::default(),
            reaped: false,
        }
    }

    /// Create from a spawned `std::process::Child`.
    ///
    /// Takes ownership of the child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin: OwnedFd = child
            .stdin
            .take()
            .ok_or_else(|| PoolvisorError::Channel("child stdin not captured".into()))?
            .into();
        let stdout: OwnedFd = child
            .stdout
            .take()
            .ok_or_else(|| PoolvisorError::Channel("child stdout not captured".into()))?
            .into();

        Ok(Self::new(pid, PipeFd::new(stdin), PipeFd::new(stdout)))
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Write a request to the command channel.
    ///
    /// Does not wait for the worker; the pipe buffers requests behind a
    /// busy worker.
    pub fn send(&mut self, request: &WorkRequest) -> io::Result<()> {
        let line = request.to_line().map_err(io::Error::other)?;
        match self.writer.as_mut() {
            Some(writer) => writer.write_line(&line),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "command channel closed",
            )),
        }
    }

    /// Borrow the completion channel for polling, if still open.
    pub fn completion_fd(&self) -> Option<BorrowedFd<'_>> {
        self.reader.as_ref().map(|r| r.as_fd())
    }

    /// Read whatever is pending on the completion channel.
    ///
    /// Call only after `poll` reports the channel ready; the read blocks
    /// otherwise.
    pub fn read_completions(&mut self) -> io::Result<CompletionRead> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "completion channel closed")
        })?;
        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(CompletionRead::Closed);
        }
        Ok(CompletionRead::Tokens(self.decoder.feed(n)))
    }

    /// Close the supervisor's end of the completion channel.
    pub fn close_completion(&mut self) {
        self.reader = None;
    }

    /// Close both channels. The worker sees EOF on its next read.
    pub fn close_channels(&mut self) {
        self.writer = None;
        self.reader = None;
    }

    /// Whether the process has been reaped.
    pub fn is_reaped(&self) -> bool {
        self.reaped
    }

    /// Wait for the process to exit (blocking).
    ///
    /// Returns the wait status.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(PoolvisorError::Worker("process already reaped".into()));
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.reaped = true;
                    return Ok(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    // ECHILD: someone else reaped it; there is nothing left to wait for
                    self.reaped = true;
                    return Err(PoolvisorError::Worker(format!("waitpid failed: {}", e)));
                }
            }
        }
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(PoolvisorError::Worker("process already reaped".into()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => Err(PoolvisorError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| PoolvisorError::Worker(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL to the process and wait for it to exit.
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| PoolvisorError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        self.wait()?;
        Ok(())
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        // Only reached unreaped when a pool is abandoned (startup failure or
        // an error escaping the supervisor); normal shutdown reaps first.
        // No grace period here: `WorkerPool` signals all of its workers and
        // waits once before any handle drops.
        if !self.reaped {
            self.close_channels();
            let _ = self.terminate();

            if let Ok(Some(_)) = self.try_wait() {
                return;
            }

            let _ = self.kill();
            self.reaped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_sh(script: &str) -> Proc {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn sh");
        Proc::from_child(child).expect("Failed to create Proc")
    }

    #[test]
    fn test_proc_echo_worker_roundtrip() {
        let mut proc = spawn_sh("while IFS= read -r line; do printf done; done");
        assert_eq!(proc.try_wait().unwrap(), None);

        proc.send(&WorkRequest::run(1)).unwrap();
        proc.send(&WorkRequest::run(2)).unwrap();

        let mut tokens = 0;
        while tokens < 2 {
            match proc.read_completions().unwrap() {
                CompletionRead::Tokens(n) => tokens += n,
                CompletionRead::Closed => panic!("worker closed early"),
            }
        }
        assert_eq!(tokens, 2);

        proc.close_channels();
        assert!(proc.completion_fd().is_none());
        let status = proc.wait().unwrap();
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
        assert!(proc.is_reaped());
    }

    #[test]
    fn test_completion_channel_eof() {
        let mut proc = spawn_sh("exit 0");
        assert_eq!(proc.read_completions().unwrap(), CompletionRead::Closed);
        proc.close_completion();
        assert!(proc.completion_fd().is_none());
        proc.close_channels();
        proc.wait().unwrap();
    }

    #[test]
    fn test_send_after_close_fails() {
        let mut proc = spawn_sh("cat >/dev/null");
        proc.close_channels();
        let err = proc.send(&WorkRequest::run(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        proc.wait().unwrap();
    }

    #[test]
    fn test_wait_twice_is_an_error() {
        let mut proc = spawn_sh("exit 3");
        let status = proc.wait().unwrap();
        assert!(matches!(status, WaitStatus::Exited(_, 3)));
        assert!(proc.wait().is_err());
        assert!(proc.try_wait().is_err());
    }

    #[test]
    fn test_drop_kills_running_worker() {
        let proc = spawn_sh("sleep 60");
        let pid = proc.pid();
        drop(proc);
        // Already reaped by Drop, so the pid is no longer our child
        assert!(waitpid(pid, Some(WaitPidFlag::WNOHANG)).is_err());
    }
}
