//! ipcrace - multi-process race over SysV IPC

mod cli;
mod error;
mod logging;
mod output;
mod race;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::sync::atomic::Ordering;

use cli::{Cli, Commands, OutputFormatArg};
use logging::LogConfig;
use output::OutputFormat;
use race::Orchestrator;
use race::spawn::Launcher;

/// Parses the CLI, sets up logging and dispatches the selected command.
///
/// Participant modes never return. On error the full chain is printed and
/// the process exits with status 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Supervisor(args) => {
            race::run_supervisor_main(args.ipc.handles(), args.race_config())
        }
        Commands::Worker(args) => {
            race::run_worker_main(args.ipc.handles(), args.worker_id(), args.race_config())
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
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = LogConfig::from_verbosity(cli.verbose, cli.quiet)
        .with_ansi(!cli.no_color)
        .with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init(config);
}

/// Run a race end to end and print its report.
///
/// Fails when the race did not reach a terminal state, after printing the
/// report so the partial state is still visible.
fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    let launcher = Launcher::current()?.with_forwarded_args(cli.forwarded_log_args());
    let orchestrator = Orchestrator::new(args.race_config(), launcher);

    let interrupted = orchestrator.interrupt_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping the race...");
        interrupted.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let report = orchestrator.run().context("Race failed")?;

    let format = match args.format {
        OutputFormatArg::Plain => OutputFormat::Plain,
        OutputFormatArg::Json => OutputFormat::Json,
    };
    output::print_report(&report, format);

    if !report.outcome.is_terminal() {
        anyhow::bail!("Race ended without a result ({})", report.outcome.as_str());
    }
    Ok(())
}
