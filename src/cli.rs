//! Command-line interface definitions using clap.

use crate::config::{DEFAULT_TIME_UNIT_MS, MAX_TYPES};
use crate::logging::LogFormat;
use crate::worker::{WorkerId, WorkerOptions};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Dispatch jobs from stdin to a fixed pool of worker processes.
///
/// Reads `type count` worker declarations (from --config or the head of
/// stdin), spawns the pool, then routes each `type duration` job pair
/// round-robin to the workers of that type until end of input.
#[derive(Parser, Debug)]
#[command(name = "poolvisor")]
#[command(author, version, long_version = crate::version::long_version(), about)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands. Without one, the supervisor runs.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Run as a worker process (spawned by the supervisor).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the supervisor.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Read worker declarations from FILE instead of the head of stdin.
    #[arg(short, long, env = "POOLVISOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of `type count` declarations to read.
    #[arg(short, long, env = "POOLVISOR_TYPES", default_value_t = MAX_TYPES)]
    pub types: usize,

    /// Length of one job duration unit, in milliseconds.
    #[arg(long, env = "POOLVISOR_TIME_UNIT_MS", default_value_t = DEFAULT_TIME_UNIT_MS)]
    pub time_unit_ms: u64,
}

/// Arguments for a worker process.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Worker type.
    #[arg(long)]
    pub worker_type: usize,

    /// Index within the type.
    #[arg(long)]
    pub worker_index: usize,

    /// Length of one job duration unit, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIME_UNIT_MS)]
    pub time_unit_ms: u64,
}

impl WorkerArgs {
    /// Runtime options for the worker loop.
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            id: WorkerId {
                worker_type: self.worker_type,
                index: self.worker_index,
            },
            time_unit: Duration::from_millis(self.time_unit_ms),
        }
    }
}

/// Arguments for shell completions.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "poolvisor",
            &mut std::io::stdout(),
        );
    }
}

/// Verbosity level for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: lifecycle, dispatches and rejections.
    Normal,
    /// -v: adds worker reaping and channel events.
    Debug,
    /// -vv: adds every completion token.
    Trace,
}

impl Cli {
    /// Get the verbosity level based on -v and -q flags.
    pub fn verbosity(&self) -> Verbosity {
        match (self.quiet, self.verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, 1) => Verbosity::Debug,
            (false, _) => Verbosity::Trace,
        }
    }

    /// Log filter requested on the command line, if any.
    ///
    /// `None` leaves the choice to the environment.
    pub fn log_filter(&self) -> Option<String> {
        match self.verbosity() {
            Verbosity::Quiet => Some("error".to_string()),
            Verbosity::Normal => None,
            Verbosity::Debug => Some("debug".to_string()),
            Verbosity::Trace => Some("trace".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        // Verify the CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_supervisor_defaults() {
        let cli = Cli::try_parse_from(["poolvisor"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.config.is_none());
        assert_eq!(cli.run.types, 5);
        assert_eq!(cli.run.time_unit_ms, 1000);
        assert_eq!(cli.verbosity(), Verbosity::Normal);
        assert!(cli.log_filter().is_none());
    }

    #[test]
    fn test_supervisor_options() {
        let cli = Cli::try_parse_from([
            "poolvisor",
            "--config",
            "workers.conf",
            "--types",
            "2",
            "--time-unit-ms",
            "5",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.run.config, Some(PathBuf::from("workers.conf")));
        assert_eq!(cli.run.types, 2);
        assert_eq!(cli.run.time_unit_ms, 5);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_worker_command() {
        let cli = Cli::try_parse_from([
            "poolvisor",
            "worker",
            "--worker-type",
            "3",
            "--worker-index",
            "1",
            "--time-unit-ms",
            "20",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Worker(args)) => {
                let options = args.options();
                assert_eq!(options.id.to_string(), "3-1");
                assert_eq!(options.time_unit, Duration::from_millis(20));
            }
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_worker_command_is_hidden() {
        let help = Cli::command().render_help().to_string();
        assert!(help.contains("completions"));
        assert!(!help.contains("worker --"));
        assert!(!help.contains("Run as a worker"));
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["poolvisor", "completions", "bash", "--no-color"]).unwrap();
        assert!(cli.no_color);
        assert!(matches!(cli.command, Some(Commands::Completions(_))));
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["poolvisor", "-vv"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Trace);
        assert_eq!(cli.log_filter().as_deref(), Some("trace"));

        let cli = Cli::try_parse_from(["poolvisor", "-q"]).unwrap();
        assert_eq!(cli.log_filter().as_deref(), Some("error"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["poolvisor", "-v", "-q"]);
        assert!(result.is_err());
    }
}
