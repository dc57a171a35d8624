//! poolvisor - round-robin supervisor for a fixed pool of worker processes

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::IsTerminal;
use tracing::{info, warn};

use poolvisor::cli::{Cli, Commands, RunArgs};
use poolvisor::config::{self, Limits};
use poolvisor::error::PoolvisorError;
use poolvisor::logging::{self, LogConfig};
use poolvisor::supervisor::Supervisor;
use poolvisor::input::PairReader;
use poolvisor::worker::ipc::PipeFd;
use poolvisor::worker::{WorkerLauncher, run_worker_main};

/// Program entry point: parses CLI arguments, runs the selected role, and handles top-level errors.
///
/// On error prints a colored error header followed by each cause in the chain, then exits with
/// 2 for configuration errors and 1 for everything else.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let log_config = log_config(&cli);

    let result = match &cli.command {
        Some(Commands::Completions(args)) => {
            args.generate();
            Ok(())
        }
        Some(Commands::Worker(args)) => {
            // Workers log through the supervisor's stderr only
            logging::init(LogConfig {
                file_path: None,
                ..log_config
            });
            run_worker_main(args.options())
        }
        None => {
            logging::init(log_config.clone());
            cmd_run(&cli.run, &log_config)
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        let code = e
            .downcast_ref::<PoolvisorError>()
            .map_or(1, PoolvisorError::exit_code);
        std::process::exit(code);
    }
}

/// Logging settings: command-line flags, then environment, then command-line overrides.
fn log_config(cli: &Cli) -> LogConfig {
    let mut config = LogConfig::new();
    if let Some(filter) = cli.log_filter() {
        config = config.with_filter(filter);
    }
    config = config.with_env_overrides();

    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    config.with_ansi(!cli.no_color && std::io::stderr().is_terminal())
}

/// Read the worker declarations, start the pool and dispatch jobs until end of input.
///
/// Declarations come from `--config` when given, otherwise from the head of stdin; in
/// that case the same buffered reader goes on to serve the jobs that follow.
fn cmd_run(args: &RunArgs, log_config: &LogConfig) -> Result<()> {
    info!("Starting job management system...");

    let limits = Limits::default();
    let stdin = PipeFd::stdin().context("cannot open standard input")?;
    let mut input = PairReader::new(stdin);

    let decls = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Reading worker configuration from {}", path.display());
            config::load_declarations(path, args.types, &limits)?
        }
        None => {
            info!(
                "Reading worker configuration ({} types) from standard input...",
                args.types
            );
            config::read_declarations(&mut input, args.types, &limits)?
        }
    };

    let mut launcher = WorkerLauncher::current_exe(args.time_unit_ms)?;
    for (key, value) in log_config.worker_env() {
        launcher = launcher.env(key, value);
    }

    let supervisor = Supervisor::start(&decls, limits, &launcher)?;
    let report = supervisor.serve(&mut input)?;

    if !report.all_clean() {
        let unclean = report.exits.iter().filter(|e| !e.reason.is_success()).count();
        warn!(unclean, "{} of {} workers did not exit cleanly", unclean, report.workers_reaped);
    }
    Ok(())
}
