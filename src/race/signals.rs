//! Termination signal protocol and exit analysis.
//!
//! Workers exit on `SIGUSR1` no matter what they are doing. The supervisor
//! sends it once per registered worker after the race is decided.

use crate::error::{RaceError, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::Serialize;

/// Signal the supervisor uses to stop workers.
pub const TERMINATION_SIGNAL: Signal = Signal::SIGUSR1;

extern "C" fn on_termination(_: libc::c_int) {
    // Only async-signal-safe work is allowed here.
    unsafe { libc::_exit(0) }
}

/// Make this process exit successfully as soon as the termination signal lands.
pub fn install_termination_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(TERMINATION_SIGNAL, &action) }
        .map(drop)
        .map_err(|errno| RaceError::Signal {
            pid: std::process::id() as i32,
            errno,
        })
}

/// Deliver the termination signal to one worker.
pub fn send_termination(pid: libc::pid_t) -> Result<()> {
    signal::kill(Pid::from_raw(pid), TERMINATION_SIGNAL)
        .map_err(|errno| RaceError::Signal { pid, errno })
}

/// Why a participant process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Workers stopped by the supervisor exit 0 from the handler, so this
    /// covers both normal completion and a delivered termination.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {}", sig.as_str()),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Serialize for TerminationReason {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
