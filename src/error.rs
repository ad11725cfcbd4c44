//! Error types for ipcrace.

use nix::errno::Errno;
use thiserror::Error;

/// Main error type for ipcrace.
#[derive(Error, Debug)]
pub enum RaceError {
    #[error("Semaphore error during {op}: {errno}")]
    Lock { op: &'static str, errno: Errno },

    #[error("Shared memory error during {op}: {errno}")]
    SharedMemory { op: &'static str, errno: Errno },

    #[error("Shared memory segment holds {found} worker slots, expected {expected}")]
    SegmentMismatch { expected: u32, found: u32 },

    #[error("Message queue error during {op}: {errno}")]
    Channel { op: &'static str, errno: Errno },

    #[error("Message queue is full, report from worker {0} dropped")]
    ChannelFull(u32),

    #[error("Report names worker {worker}, but only {workers} workers exist")]
    UnknownWorker { worker: u32, workers: u32 },

    #[error("Failed to signal pid {pid}: {errno}")]
    Signal { pid: i32, errno: Errno },

    #[error("Failed to spawn {role}: {message}")]
    Spawn { role: String, message: String },

    #[error("Participant error: {0}")]
    Participant(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RaceError {
    /// Whether a send failure is the channel pushing back rather than a broken channel.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelFull(_))
    }
}

/// Result type alias for ipcrace operations.
pub type Result<T> = std::result::Result<T, RaceError>;
