//! Participant subprocess spawning.
//!
//! Participants are started by re-executing this binary in one of its hidden
//! modes (`supervisor` or `worker`). Kernel object ids and race parameters
//! travel on the command line; the children inherit stderr for logging.

use super::config::{IpcHandles, RaceConfig, WorkerId};
use super::proc::{Participant, Role};
use crate::error::{RaceError, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Starts participant processes from a given executable.
#[derive(Debug, Clone)]
pub struct Launcher {
    exe: PathBuf,
    /// Global flags placed before the subcommand (logging options).
    forwarded: Vec<String>,
}

impl Launcher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            forwarded: Vec::new(),
        }
    }

    /// Launcher for the running executable.
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| RaceError::Spawn {
            role: "participant".to_string(),
            message: format!("Failed to get current executable: {}", e),
        })?;
        Ok(Self::new(exe))
    }

    /// Pass these global flags to every participant.
    pub fn with_forwarded_args(mut self, args: Vec<String>) -> Self {
        self.forwarded = args;
        self
    }

    pub fn spawn_supervisor(&self, handles: IpcHandles, config: &RaceConfig) -> Result<Participant> {
        self.spawn(Role::Supervisor, supervisor_args(handles, config))
    }

    pub fn spawn_worker(
        &self,
        handles: IpcHandles,
        id: WorkerId,
        config: &RaceConfig,
    ) -> Result<Participant> {
        self.spawn(Role::Worker(id), worker_args(handles, id, config))
    }

    fn spawn(&self, role: Role, args: Vec<String>) -> Result<Participant> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.forwarded);
        cmd.args(args);

        // Stdout belongs to the orchestrator's report.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| RaceError::Spawn {
            role: role.to_string(),
            message: e.to_string(),
        })?;
        Ok(Participant::from_child(role, child))
    }
}

fn handle_args(handles: IpcHandles) -> Vec<String> {
    vec![
        "--queue-id".to_string(),
        handles.queue_id.to_string(),
        "--sem-id".to_string(),
        handles.sem_id.to_string(),
        "--shm-id".to_string(),
        handles.shm_id.to_string(),
    ]
}

/// Arguments for `ipcrace supervisor`.
pub fn supervisor_args(handles: IpcHandles, config: &RaceConfig) -> Vec<String> {
    let mut args = vec!["supervisor".to_string()];
    args.extend(handle_args(handles));
    args.extend([
        "--workers".to_string(),
        config.workers.to_string(),
        "--target".to_string(),
        config.target.to_string(),
        "--milestone".to_string(),
        config.milestone.to_string(),
    ]);
    args
}

/// Arguments for `ipcrace worker`.
pub fn worker_args(handles: IpcHandles, id: WorkerId, config: &RaceConfig) -> Vec<String> {
    let mut args = vec!["worker".to_string()];
    args.extend(handle_args(handles));
    args.extend([
        "--worker-id".to_string(),
        id.to_string(),
        "--workers".to_string(),
        config.workers.to_string(),
        "--target".to_string(),
        config.target.to_string(),
        "--max-delay-us".to_string(),
        config.max_delay.as_micros().to_string(),
    ]);
    args
}
