//! Multi-process race coordinated through SysV IPC.
//!
//! N worker processes report progress to a single supervisor over a message
//! queue. The supervisor keeps the scores, publishes the current leader into a
//! shared memory segment guarded by a semaphore, and stops every worker with
//! `SIGUSR1` once a worker reaches the target.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │   Orchestrator   │  provisions, spawns, joins
//!                      └────────┬─────────┘
//!               ┌───────────────┼───────────────┐
//!         ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼──────┐
//!         │ Worker 0  │   │ Worker N  │   │ Supervisor │
//!         └──┬─────▲──┘   └──┬─────▲──┘   └──▲──────┬──┘
//!            │     │ leader  │     │         │      │ leader, winner
//!            │  ┌──┴─────────┴─────┴─────────┴──────▼──┐
//!            │  │  Shared race state (shm + semaphore) │
//!            │  └──────────────────────────────────────┘
//!            │ reports   ┌──────────────────┐ reports
//!            └──────────►│ Progress channel ├────────► Supervisor
//!                        └──────────────────┘
//!         Supervisor ── SIGUSR1 ──► every registered worker
//! ```
//!
//! Each participant is this same binary re-executed in a hidden mode; the
//! kernel object ids travel on its command line.

mod channel;
mod config;
mod lock;
mod orchestrator;
mod proc;
mod scoreboard;
mod shared;
mod signals;
pub mod spawn;
mod supervisor;
mod worker;

pub use config::{IpcHandles, RaceConfig, WorkerId};
pub use orchestrator::{Orchestrator, Outcome, RaceReport};
#[cfg(test)]
pub use orchestrator::ParticipantExit;
#[cfg(test)]
pub use signals::TerminationReason;
pub use supervisor::run_supervisor_main;
pub use worker::run_worker_main;
