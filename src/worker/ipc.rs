//! Buffered IPC primitives for worker communication.
//!
//! Provides line-based I/O over pipes with EINTR handling. [`LineReader`]
//! keeps its own buffer and exposes single-read [`LineReader::fill`], so the
//! dispatch loop only touches a descriptor after `poll` reports it ready.

use crate::config::MAX_MESSAGE_LEN;
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use thiserror::Error;

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes requested from the descriptor per `fill`.
const READ_CHUNK: usize = 4096;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Duplicate the process's stdin.
    pub fn stdin() -> io::Result<Self> {
        Ok(Self::new(io::stdin().as_fd().try_clone_to_owned()?))
    }

    /// Duplicate the process's stdout.
    pub fn stdout() -> io::Result<Self> {
        Ok(Self::new(io::stdout().as_fd().try_clone_to_owned()?))
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(()) // Pipes don't need flushing at the fd level
    }
}

/// A line that reached the reader's limit before its newline.
///
/// Everything after the first `max_line` bytes, up to and including the
/// newline, is discarded; only the prefix is kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line longer than {limit} bytes: '{prefix}...'")]
pub struct OverlongLine {
    pub prefix: String,
    pub limit: usize,
}

/// Line reader with an explicit buffer.
///
/// A line of `max_line` bytes or more is reported once as [`OverlongLine`]
/// and skipped through its newline, so a peer that never sends a newline
/// cannot grow the buffer without bound.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
    max_line: usize,
    /// Inside an over-long line; bytes are dropped until the next newline.
    discarding: bool,
}

impl<R: Read> LineReader<R> {
    /// Create a new line reader with the default line limit.
    pub fn new(inner: R) -> Self {
        Self::with_max_line(inner, MAX_MESSAGE_LEN)
    }

    /// Create a new line reader with a custom line limit.
    pub fn with_max_line(inner: R, max_line: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            eof: false,
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Perform exactly one read from the underlying source.
    ///
    /// Returns the number of bytes read; `0` marks end of stream.
    pub fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
            self.discarding = false;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
            if self.discarding {
                self.discard_overflow();
            }
        }
        Ok(n)
    }

    /// Drop the tail of an over-long line through its newline.
    fn discard_overflow(&mut self) {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.buf.drain(..=pos);
                self.discarding = false;
            }
            None => self.buf.clear(),
        }
    }

    /// Whether a line can be taken without reading.
    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n')
            || self.buf.len() >= self.max_line
            || (self.eof && !self.buf.is_empty())
    }

    /// Whether the source has reported end of stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether the source is exhausted and nothing is left buffered.
    pub fn is_drained(&self) -> bool {
        self.eof && self.buf.is_empty()
    }

    /// Take one buffered line, without its terminator.
    ///
    /// After end of stream a trailing unterminated line is returned as-is.
    /// An over-long line comes back once as an error, whole.
    pub fn take_line(&mut self) -> Option<Result<String, OverlongLine>> {
        let end = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) if pos < self.max_line => pos + 1,
            _ if self.buf.len() >= self.max_line => return Some(Err(self.take_overlong())),
            _ if self.eof && !self.buf.is_empty() => self.buf.len(),
            _ => return None,
        };
        let raw: Vec<u8> = self.buf.drain(..end).collect();
        let mut line = String::from_utf8_lossy(&raw).into_owned();
        if line.ends_with('\n') {
            line.pop();
        }
        if line.ends_with('\r') {
            line.pop();
        }
        Some(Ok(line))
    }

    fn take_overlong(&mut self) -> OverlongLine {
        let prefix: Vec<u8> = self.buf.drain(..self.max_line).collect();
        self.discarding = !self.eof;
        self.discard_overflow();
        OverlongLine {
            prefix: String::from_utf8_lossy(&prefix[..prefix.len().min(32)]).into_owned(),
            limit: self.max_line,
        }
    }

    /// Read a line, blocking until one is complete.
    /// Returns `None` on EOF; an over-long line is an `InvalidData` error.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            match self.take_line() {
                Some(Ok(line)) => return Ok(Some(line)),
                Some(Err(overlong)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, overlong));
                }
                None => {}
            }
            if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }
    }
}

impl<R: AsFd> AsFd for LineReader<R> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// Buffered line writer for IPC.
#[derive(Debug)]
pub struct LineWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> LineWriter<W> {
    /// Create a new line writer.
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }

    /// Write raw bytes and flush.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }
}
