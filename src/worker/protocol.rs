//! IPC protocol for worker subprocess communication.
//!
//! Requests travel on the command channel as newline-delimited JSON.
//! Completions travel back as a fixed 4-byte token, one per finished job.

use serde::{Deserialize, Serialize};

/// Token a worker writes after finishing one job.
pub const COMPLETION_TOKEN: &[u8; 4] = b"done";

/// Request from supervisor to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkRequest {
    /// Run one job for `duration` time units.
    #[serde(rename = "run")]
    Run {
        /// Job duration in time units
        duration: u32,
    },
}

impl WorkRequest {
    /// Create a run request.
    pub fn run(duration: u32) -> Self {
        Self::Run { duration }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Counts completion tokens in a byte stream.
///
/// Pipe reads may split a token, so the decoder carries the partial
/// remainder between reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletionDecoder {
    partial: usize,
}

impl CompletionDecoder {
    /// Feed `n` freshly read bytes; returns how many tokens completed.
    pub fn feed(&mut self, n: usize) -> usize {
        let total = self.partial + n;
        self.partial = total % COMPLETION_TOKEN.len();
        total / COMPLETION_TOKEN.len()
    }
}
