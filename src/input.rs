//! Integer-pair input shared by worker declarations and job submission.
//!
//! Input is a stream of whitespace-separated integers read two at a time;
//! line breaks carry no meaning, so `1 2 2 1` on one line and `1 2\n2 1`
//! are the same two pairs. A `#` starts a comment that runs to the end of
//! its line.
//!
//! Anything that cannot be part of a pair comes out as
//! [`Entry::Malformed`]: a non-integer token (together with a half-read
//! pair before it), an over-long line, or a lone integer left at end of
//! input. Pairing restarts after each malformed entry.

use crate::worker::ipc::LineReader;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::os::unix::io::{AsFd, BorrowedFd};

/// One unit of pair input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Two integers, in the order they were read.
    Pair(i64, i64),
    /// Input that cannot form a pair, as it appeared.
    Malformed(String),
}

/// Reads [`Entry`] values from a [`LineReader`].
///
/// Like the line reader underneath, [`take_entry`](Self::take_entry) never
/// touches the descriptor; only [`fill`](Self::fill) reads.
#[derive(Debug)]
pub struct PairReader<R> {
    lines: LineReader<R>,
    tokens: VecDeque<String>,
    half: Option<i64>,
}

impl<R: Read> PairReader<R> {
    /// Read pairs from `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            lines: LineReader::new(inner),
            tokens: VecDeque::new(),
            half: None,
        }
    }

    /// Perform exactly one read from the underlying source.
    pub fn fill(&mut self) -> io::Result<usize> {
        self.lines.fill()
    }

    /// Whether buffered input may yield an entry without reading.
    ///
    /// May report `true` for input that turns out to hold only blank lines
    /// or comments; [`take_entry`](Self::take_entry) then returns `None`.
    pub fn has_entry(&self) -> bool {
        !self.tokens.is_empty()
            || self.lines.has_line()
            || (self.lines.is_drained() && self.half.is_some())
    }

    /// Whether the source has reported end of stream.
    pub fn is_eof(&self) -> bool {
        self.lines.is_eof()
    }

    /// Whether the source is exhausted and every entry has been taken.
    pub fn is_drained(&self) -> bool {
        self.lines.is_drained() && self.tokens.is_empty() && self.half.is_none()
    }

    /// Take the next entry from buffered input.
    pub fn take_entry(&mut self) -> Option<Entry> {
        loop {
            if let Some(token) = self.tokens.pop_front() {
                match token.parse::<i64>() {
                    Ok(value) => match self.half.take() {
                        Some(first) => return Some(Entry::Pair(first, value)),
                        None => self.half = Some(value),
                    },
                    Err(_) => {
                        let text = match self.half.take() {
                            Some(first) => format!("{} {}", first, token),
                            None => token,
                        };
                        return Some(Entry::Malformed(text));
                    }
                }
                continue;
            }

            match self.lines.take_line() {
                Some(Ok(line)) => self.push_line(&line),
                Some(Err(overlong)) => {
                    self.half = None;
                    return Some(Entry::Malformed(overlong.to_string()));
                }
                None if self.lines.is_drained() => {
                    return self.half.take().map(|v| Entry::Malformed(v.to_string()));
                }
                None => return None,
            }
        }
    }

    /// Read the next entry, blocking until one is available.
    /// Returns `None` once input is exhausted.
    pub fn read_entry(&mut self) -> io::Result<Option<Entry>> {
        loop {
            if let Some(entry) = self.take_entry() {
                return Ok(Some(entry));
            }
            if self.is_drained() {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn push_line(&mut self, line: &str) {
        let content = line.split('#').next().unwrap_or_default();
        self.tokens
            .extend(content.split_whitespace().map(str::to_string));
    }
}

impl<R: AsFd> AsFd for PairReader<R> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.lines.as_fd()
    }
}
