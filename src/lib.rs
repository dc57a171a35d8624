//! poolvisor - round-robin supervisor for a fixed pool of worker processes
//!
//! A single control thread reads worker declarations, spawns the declared
//! workers as child processes, and routes `type duration` jobs from its
//! input to them round-robin per type. One `poll` covers the job input and
//! every worker's completion channel. End of input triggers an orderly
//! shutdown that reaps every worker.

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod job;
pub mod logging;
pub mod pool;
pub mod supervisor;
pub mod version;
pub mod worker;
