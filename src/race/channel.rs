//! Progress channel over a SysV message queue.
//!
//! Many workers send, one supervisor receives. Every report carries the
//! supervisor's channel class as its message type so `msgrcv` only ever hands
//! the supervisor messages addressed to it.

use super::config::WorkerId;
use crate::error::{RaceError, Result};
use nix::errno::Errno;
use std::mem::size_of;
use std::ptr;

/// Message type of reports addressed to the supervisor.
pub const SUPERVISOR_CLASS: libc::c_long = 1;

/// Wire layout of a report: the SysV `mtype` header plus the payload.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawReport {
    mtype: libc::c_long,
    sender: u32,
}

/// Payload length as `msgsnd`/`msgrcv` count it (excluding `mtype`).
const PAYLOAD_SIZE: usize = size_of::<RawReport>() - size_of::<libc::c_long>();

/// One unit of progress from one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub sender: WorkerId,
}

impl ProgressReport {
    pub fn new(sender: WorkerId) -> Self {
        Self { sender }
    }
}

/// Anything the supervisor can pull reports from.
pub trait ReportSource {
    /// Block until the next report is available.
    fn receive(&mut self) -> Result<ProgressReport>;
}

/// Handle to the race's message queue.
#[derive(Debug, Clone, Copy)]
pub struct ProgressChannel {
    queue_id: i32,
}

impl ProgressChannel {
    /// Create a private queue.
    pub fn create() -> Result<Self> {
        let queue_id = Errno::result(unsafe { libc::msgget(libc::IPC_PRIVATE, 0o600) })
            .map_err(|errno| RaceError::Channel { op: "msgget", errno })?;
        Ok(Self { queue_id })
    }

    /// Refer to a queue created by another process.
    pub fn open(queue_id: i32) -> Self {
        Self { queue_id }
    }

    pub fn id(&self) -> i32 {
        self.queue_id
    }

    /// Enqueue a report without waiting for space.
    ///
    /// A full queue comes back as [`RaceError::ChannelFull`]; the caller
    /// decides whether the report is worth retrying.
    pub fn send(&self, report: ProgressReport) -> Result<()> {
        let raw = RawReport {
            mtype: SUPERVISOR_CLASS,
            sender: report.sender.get(),
        };
        loop {
            let rc = unsafe {
                libc::msgsnd(
                    self.queue_id,
                    ptr::from_ref(&raw).cast::<libc::c_void>(),
                    PAYLOAD_SIZE,
                    libc::IPC_NOWAIT,
                )
            };
            match Errno::result(rc) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Err(RaceError::ChannelFull(report.sender.get())),
                Err(errno) => return Err(RaceError::Channel { op: "msgsnd", errno }),
            }
        }
    }

    /// Block until a report addressed to the supervisor arrives.
    pub fn receive(&self) -> Result<ProgressReport> {
        let mut raw = RawReport {
            mtype: 0,
            sender: 0,
        };
        loop {
            let rc = unsafe {
                libc::msgrcv(
                    self.queue_id,
                    ptr::from_mut(&mut raw).cast::<libc::c_void>(),
                    PAYLOAD_SIZE,
                    SUPERVISOR_CLASS,
                    0,
                )
            };
            match Errno::result(rc) {
                Ok(_) => return Ok(ProgressReport::new(WorkerId::new(raw.sender))),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(RaceError::Channel { op: "msgrcv", errno }),
            }
        }
    }

    /// Number of reports currently waiting in the queue.
    pub fn pending(&self) -> Result<u64> {
        let mut stat: libc::msqid_ds = unsafe { std::mem::zeroed() };
        Errno::result(unsafe { libc::msgctl(self.queue_id, libc::IPC_STAT, &mut stat) })
            .map_err(|errno| RaceError::Channel {
                op: "msgctl(IPC_STAT)",
                errno,
            })?;
        Ok(stat.msg_qnum as u64)
    }

    /// Remove the queue; blocked receivers wake up with `EIDRM`.
    pub fn destroy(&self) -> Result<()> {
        Errno::result(unsafe { libc::msgctl(self.queue_id, libc::IPC_RMID, ptr::null_mut()) })
            .map(drop)
            .map_err(|errno| RaceError::Channel {
                op: "msgctl(IPC_RMID)",
                errno,
            })
    }
}

impl ReportSource for ProgressChannel {
    fn receive(&mut self) -> Result<ProgressReport> {
        ProgressChannel::receive(self)
    }
}
