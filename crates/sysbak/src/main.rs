//! sysbak CLI - whole-system backup and restore
//!
//! This is the main entry point for the sysbak command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use std::process::ExitCode;
use sysbak_backup::RunLog;
use sysbak_core::{ConfigLoader, PartialConfig, ResolvedConfig, RunConfiguration};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

/// Conventional status for a run ended by SIGINT/SIGTERM
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let (cli, dropped) = match cli::parse_lenient(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => e.exit(),
    };

    let resolved = match resolve_config(&cli) {
        Ok(resolved) => resolved,
        Err(e) => {
            output::error(&format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };

    let log = open_run_log(&resolved.config);

    init_tracing(cli.verbose, cli.quiet, log.as_ref());

    for arg in &dropped {
        warn!("Ignoring unknown argument '{}'", arg);
    }
    for warning in &resolved.warnings {
        warn!("{}", warning);
    }
    if let Some(source) = &resolved.source {
        tracing::debug!("Loaded configuration from {}", source);
    }

    let config = resolved.config;
    let command = async {
        match cli.command {
            Commands::Backup(_) => match &log {
                Some(log) => commands::backup::run(&config, log).await,
                None => Err(anyhow::anyhow!(
                    "Run log {} is unavailable",
                    config.log_file
                )),
            },
            Commands::Restore(args) => commands::restore::run(args, &config).await,
        }
    };

    tokio::select! {
        result = command => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                output::error(&format!("{:#}", e));
                ExitCode::FAILURE
            }
        },
        signal = shutdown_signal() => {
            // The dropped command raises its cancel flag; the runtime then
            // waits for the worker, which releases the lock and scratch space.
            warn!("Received {}; stopping the run", signal);
            output::warning("Interrupted; stopping the run and releasing the lock");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

/// Opens the configured run log, falling back to one in the work directory.
fn open_run_log(config: &RunConfiguration) -> Option<RunLog> {
    let err = match RunLog::open(config.log_file.as_std_path()) {
        Ok(log) => return Some(log),
        Err(e) => e,
    };

    let fallback = config.work_dir.join(format!("{}.log", config.prefix));
    match RunLog::open(fallback.as_std_path()) {
        Ok(log) => {
            output::warning(&format!("{:#}; logging to {} instead", err, fallback));
            Some(log)
        }
        Err(e) => {
            output::warning(&format!("{:#}; {:#}; logging to the console only", err, e));
            None
        }
    }
}

/// Resolves the configuration with the subcommand's flags as the top layer.
fn resolve_config(cli: &Cli) -> Result<ResolvedConfig> {
    let overrides: PartialConfig = match &cli.command {
        Commands::Backup(args) => args.to_overrides(),
        Commands::Restore(args) => args.to_overrides(),
    };
    let loader = ConfigLoader::new()?;
    Ok(loader.load(cli.config.as_deref(), overrides)?)
}

/// Waits for SIGINT or SIGTERM and names the one received.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

/// Initialize tracing with appropriate verbosity
///
/// Events go to the console and, without ANSI codes, to the run log.
fn init_tracing(verbose: u8, quiet: bool, log: Option<&RunLog>) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let file_layer = log.map(|log| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(log.clone())
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
}
