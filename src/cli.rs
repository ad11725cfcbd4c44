//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::race::{IpcHandles, RaceConfig, WorkerId};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Multi-process race over SysV message queues, semaphores and shared memory.
#[derive(Parser, Debug)]
#[command(name = "ipcrace")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log format: pretty, compact or json.
    #[arg(long, global = true, env = "IPCRACE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also append logs to this file.
    #[arg(long, global = true, env = "IPCRACE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Logging flags to hand to participant processes.
    pub fn forwarded_log_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.quiet {
            args.push("--quiet".to_string());
        } else if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        if let Some(format) = self.log_format {
            args.push("--log-format".to_string());
            args.push(format.to_string());
        }
        if let Some(path) = &self.log_file {
            args.push("--log-file".to_string());
            args.push(path.display().to_string());
        }
        if self.no_color {
            args.push("--no-color".to_string());
        }
        args
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a race and print its report.
    Run(RunArgs),

    /// Consume progress reports and decide the race (spawned by `run`).
    #[command(hide = true)]
    Supervisor(SupervisorArgs),

    /// Report progress until done or stopped (spawned by `run`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    /// Human-readable summary.
    #[default]
    Plain,
    /// JSON document.
    Json,
}

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of worker processes.
    #[arg(short = 'n', long, env = "IPCRACE_WORKERS", default_value_t = 12)]
    pub workers: u32,

    /// Reports a worker must land to win.
    #[arg(short, long, env = "IPCRACE_TARGET", default_value_t = 100)]
    pub target: u32,

    /// Announce the leader at every multiple of this score.
    #[arg(short, long, env = "IPCRACE_MILESTONE", default_value_t = 5)]
    pub milestone: u32,

    /// Upper bound of the random delay before each report, in microseconds.
    #[arg(long, env = "IPCRACE_MAX_DELAY_US", default_value_t = 398)]
    pub max_delay_us: u64,

    /// How long stragglers get once the race is decided, in milliseconds.
    #[arg(long, env = "IPCRACE_GRACE_MS", default_value_t = 2000)]
    pub grace_ms: u64,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,
}

impl RunArgs {
    pub fn race_config(&self) -> RaceConfig {
        RaceConfig::default()
            .with_workers(self.workers)
            .with_target(self.target)
            .with_milestone(self.milestone)
            .with_max_delay(Duration::from_micros(self.max_delay_us))
            .with_grace(Duration::from_millis(self.grace_ms))
    }
}

/// Kernel object ids shared by every participant.
#[derive(Args, Debug)]
pub struct HandleArgs {
    #[arg(long)]
    pub queue_id: i32,

    #[arg(long)]
    pub sem_id: i32,

    #[arg(long)]
    pub shm_id: i32,
}

impl HandleArgs {
    pub fn handles(&self) -> IpcHandles {
        IpcHandles {
            queue_id: self.queue_id,
            sem_id: self.sem_id,
            shm_id: self.shm_id,
        }
    }
}

/// Arguments for the hidden supervisor command.
#[derive(Args, Debug)]
pub struct SupervisorArgs {
    #[command(flatten)]
    pub ipc: HandleArgs,

    #[arg(long)]
    pub workers: u32,

    #[arg(long)]
    pub target: u32,

    #[arg(long)]
    pub milestone: u32,
}

impl SupervisorArgs {
    pub fn race_config(&self) -> RaceConfig {
        RaceConfig::default()
            .with_workers(self.workers)
            .with_target(self.target)
            .with_milestone(self.milestone)
    }
}

/// Arguments for the hidden worker command.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub ipc: HandleArgs,

    #[arg(long)]
    pub worker_id: u32,

    #[arg(long)]
    pub workers: u32,

    #[arg(long)]
    pub target: u32,

    #[arg(long, default_value_t = 398)]
    pub max_delay_us: u64,
}

impl WorkerArgs {
    pub fn worker_id(&self) -> WorkerId {
        WorkerId::new(self.worker_id)
    }

    pub fn race_config(&self) -> RaceConfig {
        RaceConfig::default()
            .with_workers(self.workers)
            .with_target(self.target)
            .with_max_delay(Duration::from_micros(self.max_delay_us))
    }
}
