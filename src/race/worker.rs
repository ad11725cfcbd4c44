//! Worker process: registers itself, then reports progress until done or told to stop.
//!
//! This module runs when `ipcrace worker` is invoked by the orchestrator.

use super::channel::{ProgressChannel, ProgressReport};
use super::config::{IpcHandles, RaceConfig, WorkerId};
use super::lock::SemLock;
use super::shared::SharedRace;
use super::signals::install_termination_handler;
use crate::error::Result;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// What a worker did over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub sent: u32,
    pub dropped: u32,
    /// Leader as last observed in shared state; advisory only.
    pub last_seen_leader: Option<WorkerId>,
}

/// One race participant.
pub struct Worker<'a> {
    id: WorkerId,
    channel: ProgressChannel,
    race: &'a SharedRace,
    reports: u32,
    max_delay: Duration,
}

impl<'a> Worker<'a> {
    pub fn new(
        id: WorkerId,
        channel: ProgressChannel,
        race: &'a SharedRace,
        config: &RaceConfig,
    ) -> Self {
        Self {
            id,
            channel,
            race,
            reports: config.target,
            max_delay: config.max_delay,
        }
    }

    /// Publish this process's pid in the worker registry.
    pub fn register(&self, pid: libc::pid_t) -> Result<()> {
        let view = self.race.lock()?;
        view.register_worker_pid(self.id, pid)?;
        view.release()
    }

    /// Send one report per iteration.
    ///
    /// Dropped reports are not retried; they only cost this worker progress.
    /// Lock failures are returned because the worker cannot coordinate without it.
    pub fn run(&self) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary {
            sent: 0,
            dropped: 0,
            last_seen_leader: None,
        };
        let mut rng = rand::rng();

        for iteration in 0..self.reports {
            self.jitter(&mut rng);

            if let Err(e) = self.channel.send(ProgressReport::new(self.id)) {
                if e.is_transient() {
                    warn!(
                        worker_id = self.id.get(),
                        iteration,
                        "Progress channel full, report dropped"
                    );
                } else {
                    warn!(worker_id = self.id.get(), iteration, error = %e, "Report dropped");
                }
                summary.dropped += 1;
                continue;
            }
            summary.sent += 1;

            let view = self.race.lock()?;
            let leader = view.read_leader();
            view.release()?;

            if summary.last_seen_leader != Some(leader) {
                debug!(worker_id = self.id.get(), leader = leader.get(), "Leader changed");
                summary.last_seen_leader = Some(leader);
            }
        }
        Ok(summary)
    }

    fn jitter(&self, rng: &mut impl Rng) {
        let max_us = self.max_delay.as_micros() as u64;
        if max_us > 0 {
            std::thread::sleep(Duration::from_micros(rng.random_range(0..max_us)));
        }
    }
}

fn participate(handles: IpcHandles, id: WorkerId, config: &RaceConfig) -> Result<WorkerSummary> {
    config.validate()?;
    let race = SharedRace::attach(handles.shm_id, SemLock::open(handles.sem_id), config.workers)?;
    let worker = Worker::new(id, ProgressChannel::open(handles.queue_id), &race, config);
    worker.register(std::process::id() as libc::pid_t)?;
    worker.run()
}

/// Run the worker subprocess main function.
///
/// Never returns. The termination handler may end the process at any point
/// after it is installed, always with status 0.
pub fn run_worker_main(handles: IpcHandles, id: WorkerId, config: RaceConfig) -> ! {
    let span = info_span!("worker", worker_id = id.get(), pid = std::process::id());
    let _enter = span.enter();

    // Without the handler the default action still stops us, just less cleanly.
    if let Err(e) = install_termination_handler() {
        warn!(error = %e, "Failed to install termination handler");
    }
    info!("Worker starting");

    match participate(handles, id, &config) {
        Ok(summary) => {
            info!(sent = summary.sent, dropped = summary.dropped, "Worker finished");
            std::process::exit(0);
        }
        Err(e) => {
            error!(error = %e, "Worker failed");
            std::process::exit(1);
        }
    }
}
