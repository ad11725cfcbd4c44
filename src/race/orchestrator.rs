//! Race orchestration: provision, spawn, join, report, clean up.
//!
//! The orchestrator owns the three kernel objects for the lifetime of a run.
//! It never takes part in the race itself; it only reads the final shared
//! state once every participant is gone.

use super::channel::ProgressChannel;
use super::config::{IpcHandles, RaceConfig, WorkerId};
use super::lock::SemLock;
use super::proc::Participant;
use super::shared::{RaceSnapshot, SharedRace};
use super::signals::TerminationReason;
use super::spawn::Launcher;
use crate::error::{RaceError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Interval between participant polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time a straggler gets between SIGTERM and SIGKILL.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// The kernel objects backing one run.
///
/// Dropping the set removes every object, so an early return never leaks
/// queues, semaphores or segments.
pub struct Provisioned {
    channel: ProgressChannel,
    lock: SemLock,
    race: SharedRace,
    destroyed: bool,
}

impl Provisioned {
    /// Create the channel, the lock and the shared block, in that order.
    pub fn new(workers: u32) -> Result<Self> {
        let channel = ProgressChannel::create()?;
        info!(queue_id = channel.id(), "Progress channel initialized");

        let lock = match SemLock::create() {
            Ok(lock) => lock,
            Err(e) => {
                let _ = channel.destroy();
                return Err(e);
            }
        };
        info!(sem_id = lock.id(), "Race lock initialized");

        let race = match SharedRace::create(workers, lock) {
            Ok(race) => race,
            Err(e) => {
                let _ = lock.destroy();
                let _ = channel.destroy();
                return Err(e);
            }
        };
        info!(shm_id = race.id(), workers, "Shared race state initialized");

        Ok(Self {
            channel,
            lock,
            race,
            destroyed: false,
        })
    }

    /// Reports sent but never consumed.
    pub fn unconsumed_reports(&self) -> Result<u64> {
        self.channel.pending()
    }

    pub fn handles(&self) -> IpcHandles {
        IpcHandles {
            queue_id: self.channel.id(),
            sem_id: self.lock.id(),
            shm_id: self.race.id(),
        }
    }

    /// Read the final state. Only valid once every participant is gone.
    pub fn snapshot(&self) -> Result<RaceSnapshot> {
        // Nobody is left to release a held lock, so waiting would never end.
        if self.lock.value()? == 0 {
            return Err(RaceError::Participant(
                "race lock still held after all participants exited".to_string(),
            ));
        }
        let view = self.race.lock()?;
        let snapshot = view.snapshot();
        view.release()?;
        Ok(snapshot)
    }

    /// Remove all three objects. Failures are logged, never returned.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match self.channel.destroy() {
            Ok(()) => info!(queue_id = self.channel.id(), "Progress channel deleted"),
            Err(e) => warn!(error = %e, "Failed to delete progress channel"),
        }
        match self.lock.destroy() {
            Ok(()) => info!(sem_id = self.lock.id(), "Race lock deleted"),
            Err(e) => warn!(error = %e, "Failed to delete race lock"),
        }
        match self.race.destroy() {
            Ok(()) => info!(shm_id = self.race.id(), "Shared race state deleted"),
            Err(e) => warn!(error = %e, "Failed to delete shared race state"),
        }
    }
}

impl Drop for Provisioned {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A worker reached the target.
    Winner,
    /// The report budget ran out without a winner.
    Exhausted,
    /// Interrupted before the race was decided.
    Aborted,
    /// Participants ended without the race reaching a terminal state.
    Incomplete,
}

impl Outcome {
    /// Winner and exhaustion are the only states the race can legitimately end in.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Winner | Self::Exhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Winner => "winner",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
            Self::Incomplete => "incomplete",
        }
    }
}

/// How one participant process ended.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantExit {
    pub role: String,
    pub pid: i32,
    pub exit: TerminationReason,
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RaceReport {
    pub outcome: Outcome,
    pub winner: Option<WorkerId>,
    pub leader: WorkerId,
    pub reports_processed: u32,
    pub exhaustion_bound: u64,
    /// Reports still queued when the run ended.
    pub unconsumed_reports: u64,
    pub workers: u32,
    /// Workers that registered their pid before the run ended.
    pub registered_workers: usize,
    pub target: u32,
    pub elapsed_ms: u64,
    pub participants: Vec<ParticipantExit>,
}

impl RaceReport {
    fn build(
        config: &RaceConfig,
        snapshot: &RaceSnapshot,
        unconsumed_reports: u64,
        aborted: bool,
        elapsed: Duration,
        participants: &[&Participant],
    ) -> Self {
        let exhaustion_bound = config.exhaustion_bound();
        let outcome = if snapshot.winner.is_some() {
            Outcome::Winner
        } else if u64::from(snapshot.reports_processed) >= exhaustion_bound {
            Outcome::Exhausted
        } else if aborted {
            Outcome::Aborted
        } else {
            Outcome::Incomplete
        };

        let participants = participants
            .iter()
            .map(|p| ParticipantExit {
                role: p.role().to_string(),
                pid: p.pid().as_raw(),
                exit: p.exit().cloned().unwrap_or(TerminationReason::Unknown),
            })
            .collect();

        Self {
            outcome,
            winner: snapshot.winner,
            leader: snapshot.leader,
            reports_processed: snapshot.reports_processed,
            exhaustion_bound,
            unconsumed_reports,
            workers: config.workers,
            registered_workers: snapshot.worker_pids.iter().filter(|&&pid| pid > 0).count(),
            target: config.target,
            elapsed_ms: elapsed.as_millis() as u64,
            participants,
        }
    }

    /// Participants that did not exit with status 0.
    pub fn failed_participants(&self) -> impl Iterator<Item = &ParticipantExit> {
        self.participants.iter().filter(|p| !p.exit.is_success())
    }
}

/// Runs one race from provisioning to cleanup.
pub struct Orchestrator {
    config: RaceConfig,
    launcher: Launcher,
    interrupted: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: RaceConfig, launcher: Launcher) -> Self {
        Self {
            config,
            launcher,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that aborts the run once set; hand it to a Ctrl+C handler.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn run(&self) -> Result<RaceReport> {
        self.config.validate()?;
        let span = info_span!("orchestrator", pid = std::process::id());
        let _enter = span.enter();

        let started = Instant::now();
        let mut objects = Provisioned::new(self.config.workers)?;
        let handles = objects.handles();

        info!(
            workers = self.config.workers,
            target = self.config.target,
            "Spawning participants"
        );
        let (mut supervisor, mut workers) = self.spawn_all(handles)?;

        self.join(&mut supervisor, &mut workers);
        // Ctrl+C also reaches the participants directly, so they may all be
        // gone before the join loop sees the flag.
        let aborted = self.interrupted.load(Ordering::SeqCst);
        let snapshot = objects.snapshot()?;
        let unconsumed = objects.unconsumed_reports().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to inspect progress channel");
            0
        });
        objects.destroy();

        let mut all: Vec<&Participant> = Vec::with_capacity(workers.len() + 1);
        all.push(&supervisor);
        all.extend(workers.iter());
        let report = RaceReport::build(
            &self.config,
            &snapshot,
            unconsumed,
            aborted,
            started.elapsed(),
            &all,
        );

        info!(
            outcome = report.outcome.as_str(),
            leader = report.leader.get(),
            reports_processed = report.reports_processed,
            "Race complete"
        );
        Ok(report)
    }

    /// Spawn the supervisor, then every worker.
    ///
    /// On failure the handles spawned so far are dropped, which kills them.
    fn spawn_all(&self, handles: IpcHandles) -> Result<(Participant, Vec<Participant>)> {
        let supervisor = self.launcher.spawn_supervisor(handles, &self.config)?;
        debug!(pid = supervisor.pid().as_raw(), "Supervisor spawned");

        let mut workers = Vec::with_capacity(self.config.workers as usize);
        for id in 0..self.config.workers {
            let worker = self
                .launcher
                .spawn_worker(handles, WorkerId::new(id), &self.config)?;
            debug!(worker_id = id, pid = worker.pid().as_raw(), "Worker spawned");
            workers.push(worker);
        }
        Ok((supervisor, workers))
    }

    /// Wait for every participant, stopping stragglers.
    fn join(&self, supervisor: &mut Participant, workers: &mut [Participant]) {
        let grace = self.config.grace;
        let mut supervisor_done_at: Option<Instant> = None;
        let mut workers_done_at: Option<Instant> = None;

        loop {
            poll(supervisor);
            workers.iter_mut().for_each(poll);

            let supervisor_done = supervisor.has_exited();
            let workers_done = workers.iter().all(Participant::has_exited);
            if supervisor_done && workers_done {
                return;
            }

            if self.interrupted.load(Ordering::SeqCst) {
                warn!("Interrupted, stopping all participants");
                stop(supervisor);
                workers.iter_mut().for_each(stop);
                return;
            }

            if supervisor_done && supervisor_done_at.is_none() {
                supervisor_done_at = Some(Instant::now());
            }
            if workers_done && workers_done_at.is_none() {
                workers_done_at = Some(Instant::now());
            }

            if supervisor_done_at.is_some_and(|at| at.elapsed() >= grace) {
                let stragglers = workers.iter().filter(|w| !w.has_exited()).count();
                warn!(stragglers, "Workers still running after supervisor exit, stopping them");
                workers.iter_mut().for_each(stop);
            } else if workers_done_at.is_some_and(|at| at.elapsed() >= grace) {
                warn!("Supervisor still running after all workers exited, stopping it");
                stop(supervisor);
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn poll(participant: &mut Participant) {
    let role = participant.role();
    let pid = participant.pid().as_raw();
    match participant.try_wait() {
        Ok(Some(reason)) if reason.is_success() => {
            debug!(%role, pid, "Participant exited")
        }
        Ok(Some(reason)) => warn!(%role, pid, reason = %reason, "Participant exited abnormally"),
        Ok(None) => {}
        Err(e) => warn!(%role, pid, error = %e, "Failed to poll participant"),
    }
}

fn stop(participant: &mut Participant) {
    if participant.has_exited() {
        return;
    }
    if let Err(e) = participant.stop(STOP_TIMEOUT) {
        warn!(role = %participant.role(), error = %e, "Failed to stop participant");
    }
}
