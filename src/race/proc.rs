//! Process handle for race participants.
//!
//! Wraps a spawned supervisor or worker so the orchestrator can poll, stop
//! and reap it. A handle that is dropped unreaped kills its process.

use super::config::WorkerId;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{RaceError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;
use std::time::{Duration, Instant};

/// What a participant process does in the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    Worker(WorkerId),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor => write!(f, "supervisor"),
            Self::Worker(id) => write!(f, "worker {}", id),
        }
    }
}

/// Handle to one participant process.
#[derive(Debug)]
pub struct Participant {
    role: Role,
    pid: Pid,
    /// Set once the process has been reaped.
    exit: Option<TerminationReason>,
}

impl Participant {
    pub fn new(role: Role, pid: Pid) -> Self {
        Self {
            role,
            pid,
            exit: None,
        }
    }

    /// Take over a spawned `std::process::Child`.
    ///
    /// Reaping is done through `waitpid` from here on.
    pub fn from_child(role: Role, child: std::process::Child) -> Self {
        Self::new(role, Pid::from_raw(child.id() as i32))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Exit reason, if the process has been reaped.
    pub fn exit(&self) -> Option<&TerminationReason> {
        self.exit.as_ref()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Reap the process if it has exited (non-blocking).
    pub fn try_wait(&mut self) -> Result<Option<&TerminationReason>> {
        if self.exit.is_some() {
            return Ok(self.exit.as_ref());
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.exit = Some(analyze_wait_status(status));
                Ok(self.exit.as_ref())
            }
            Err(e) => Err(RaceError::Participant(format!(
                "waitpid for {} failed: {}",
                self.role, e
            ))),
        }
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<&TerminationReason> {
        if self.exit.is_none() {
            let status = waitpid(self.pid, None).map_err(|e| {
                RaceError::Participant(format!("waitpid for {} failed: {}", self.role, e))
            })?;
            self.exit = Some(analyze_wait_status(status));
        }
        self.exit
            .as_ref()
            .ok_or_else(|| RaceError::Participant(format!("{} was not reaped", self.role)))
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM).map_err(|errno| RaceError::Signal {
            pid: self.pid.as_raw(),
            errno,
        })
    }

    /// Send SIGKILL to the process and reap it.
    pub fn kill(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL).map_err(|errno| RaceError::Signal {
            pid: self.pid.as_raw(),
            errno,
        })?;
        self.wait()?;
        Ok(())
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        let _ = self.terminate();

        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(_)) = self.try_wait() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.kill()
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn sleeper(role: Role) -> Participant {
        let child = Command::new("sleep")
            .arg("60")
            .spawn()
            .expect("Failed to spawn sleep");
        Participant::from_child(role, child)
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Supervisor.to_string(), "supervisor");
        assert_eq!(Role::Worker(WorkerId::new(4)).to_string(), "worker 4");
    }

    #[test]
    fn test_try_wait_running_then_exited() {
        let child = Command::new("true").spawn().expect("Failed to spawn true");
        let mut proc = Participant::from_child(Role::Supervisor, child);

        let start = Instant::now();
        while proc.try_wait().unwrap().is_none() {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(proc.exit(), Some(&TerminationReason::Exited(0)));
        // Reaped handles answer from the cache.
        assert!(proc.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_stop_terminates_sleeper() {
        let mut proc = sleeper(Role::Worker(WorkerId::new(0)));
        assert!(proc.try_wait().unwrap().is_none());

        proc.stop(Duration::from_secs(1)).unwrap();
        assert_eq!(
            proc.exit(),
            Some(&TerminationReason::Signaled(Signal::SIGTERM))
        );
    }

    #[test]
    fn test_kill_reaps() {
        let mut proc = sleeper(Role::Worker(WorkerId::new(1)));
        proc.kill().unwrap();
        assert_eq!(
            proc.exit(),
            Some(&TerminationReason::Signaled(Signal::SIGKILL))
        );
        assert!(proc.has_exited());
    }

    #[test]
    fn test_wait_reports_exit_code() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .expect("Failed to spawn sh");
        let mut proc = Participant::from_child(Role::Supervisor, child);
        assert_eq!(proc.wait().unwrap(), &TerminationReason::Exited(3));
    }
}
