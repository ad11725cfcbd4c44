//! Supervisor process: consumes reports, publishes the leader, stops workers.
//!
//! This module runs when `ipcrace supervisor` is invoked by the orchestrator.

use super::channel::{ProgressChannel, ReportSource};
use super::config::{IpcHandles, RaceConfig, WorkerId};
use super::lock::SemLock;
use super::scoreboard::Scoreboard;
use super::shared::SharedRace;
use super::signals::send_termination;
use crate::error::Result;
use tracing::{debug, error, info, info_span, warn};

/// How the consuming phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub winner: Option<WorkerId>,
    pub leader: WorkerId,
    pub reports_processed: u32,
}

/// Result of signalling every registered worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub failed: usize,
    pub unregistered: usize,
}

/// The sole consumer of the progress channel and sole writer of race state.
pub struct Supervisor<'a, S: ReportSource> {
    source: S,
    race: &'a SharedRace,
    board: Scoreboard,
    exhaustion_bound: u32,
}

impl<'a, S: ReportSource> Supervisor<'a, S> {
    pub fn new(source: S, race: &'a SharedRace, config: &RaceConfig) -> Self {
        Self {
            source,
            race,
            board: Scoreboard::new(race.worker_count(), config.target, config.milestone),
            exhaustion_bound: u32::try_from(config.exhaustion_bound()).unwrap_or(u32::MAX),
        }
    }

    /// Consume reports until a winner is decided or the report budget is spent.
    ///
    /// Any receive failure is returned as-is: without the channel no winner can
    /// be decided.
    pub fn consume(&mut self) -> Result<Verdict> {
        loop {
            let report = self.source.receive()?;

            let decision = match self.board.record(report.sender) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed report");
                    continue;
                }
            };

            if let Some(score) = decision.milestone {
                info!(
                    worker_id = decision.leader.get(),
                    score, "Worker first to reach {} points", score
                );
            }

            let view = self.race.lock()?;
            view.publish_leader(decision.leader);
            let reports_processed = view.increment_reports_processed();
            if let Some(winner) = decision.winner {
                view.publish_winner(winner);
            }
            view.release()?;

            debug!(
                sender = report.sender.get(),
                leader = decision.leader.get(),
                leader_score = decision.leader_score,
                reports_processed,
                "Report consumed"
            );

            if decision.winner.is_some() || reports_processed >= self.exhaustion_bound {
                return Ok(Verdict {
                    winner: decision.winner,
                    leader: decision.leader,
                    reports_processed,
                });
            }
        }
    }
}

/// Send the termination signal to every registered worker.
///
/// Individual failures (usually a worker that already exited) are logged and
/// the remaining workers are still signalled.
///
/// Slots are never cleared, so a worker that finished its reports and was
/// already reaped by the orchestrator is still signalled by pid. If the
/// kernel has reused that pid in the meantime, an unrelated process receives
/// `SIGUSR1`, which terminates it unless it handles the signal.
pub fn broadcast_termination(race: &SharedRace) -> Result<BroadcastSummary> {
    let view = race.lock()?;
    let pids = view.read_all_pids();
    view.release()?;

    let mut summary = BroadcastSummary::default();
    for (worker_id, pid) in pids.into_iter().enumerate() {
        if pid <= 0 {
            // Signalling pid 0 would hit the whole process group.
            warn!(worker_id, "Worker never registered, not signalling");
            summary.unregistered += 1;
            continue;
        }
        match send_termination(pid) {
            Ok(()) => {
                debug!(worker_id, pid, "Termination delivered");
                summary.delivered += 1;
            }
            Err(e) => {
                warn!(worker_id, pid, error = %e, "Termination delivery failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn supervise(handles: IpcHandles, config: &RaceConfig) -> Result<Verdict> {
    config.validate()?;
    let race = SharedRace::attach(handles.shm_id, SemLock::open(handles.sem_id), config.workers)?;
    let channel = ProgressChannel::open(handles.queue_id);

    let verdict = Supervisor::new(channel, &race, config).consume()?;
    match verdict.winner {
        Some(winner) => info!(
            winner = winner.get(),
            reports_processed = verdict.reports_processed,
            "Race finished"
        ),
        None => info!(
            leader = verdict.leader.get(),
            reports_processed = verdict.reports_processed,
            "Report budget exhausted without a winner"
        ),
    }

    let summary = broadcast_termination(&race)?;
    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        unregistered = summary.unregistered,
        "Termination broadcast complete"
    );
    Ok(verdict)
}

/// Run the supervisor subprocess main function.
///
/// This function never returns; the exit status tells the orchestrator
/// whether the race reached a terminal state.
pub fn run_supervisor_main(handles: IpcHandles, config: RaceConfig) -> ! {
    let span = info_span!("supervisor", pid = std::process::id());
    let _enter = span.enter();
    info!(workers = config.workers, target = config.target, "Supervisor starting");

    match supervise(handles, &config) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "Supervisor failed");
            std::process::exit(1);
        }
    }
}
