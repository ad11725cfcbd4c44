//! Binary lock over a SysV semaphore.
//!
//! Both operations use `SEM_UNDO`, so if a process dies while holding the
//! lock the kernel restores the semaphore and nobody deadlocks.

use crate::error::{RaceError, Result};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask};

/// Signal held back while the lock is owned.
const MASKED_SIGNAL: Signal = Signal::SIGUSR1;

/// A one-semaphore SysV set used as a mutex between processes.
#[derive(Debug, Clone, Copy)]
pub struct SemLock {
    sem_id: i32,
}

impl SemLock {
    /// Create a private semaphore set and mark it available.
    pub fn create() -> Result<Self> {
        let sem_id = Errno::result(unsafe { libc::semget(libc::IPC_PRIVATE, 1, 0o600) })
            .map_err(|errno| RaceError::Lock { op: "semget", errno })?;

        let lock = Self { sem_id };
        let value: libc::c_int = 1;
        if let Err(errno) = Errno::result(unsafe { libc::semctl(sem_id, 0, libc::SETVAL, value) })
        {
            let _ = lock.destroy();
            return Err(RaceError::Lock {
                op: "semctl(SETVAL)",
                errno,
            });
        }
        Ok(lock)
    }

    /// Refer to a semaphore set created by another process.
    pub fn open(sem_id: i32) -> Self {
        Self { sem_id }
    }

    pub fn id(&self) -> i32 {
        self.sem_id
    }

    /// Block until this process owns the lock.
    ///
    /// `SIGUSR1` stays blocked until the returned guard is released, so a
    /// termination request arriving mid-section runs right after release.
    pub fn acquire(&self) -> Result<LockGuard> {
        let saved_mask = block_termination()?;
        if let Err(err) = self.semop(-1, "acquire") {
            restore_mask(&saved_mask);
            return Err(err);
        }
        Ok(LockGuard {
            lock: *self,
            saved_mask,
            released: false,
        })
    }

    /// Current semaphore value (1 = free, 0 = held).
    pub fn value(&self) -> Result<i32> {
        Errno::result(unsafe { libc::semctl(self.sem_id, 0, libc::GETVAL) })
            .map_err(|errno| RaceError::Lock {
                op: "semctl(GETVAL)",
                errno,
            })
    }

    /// Remove the semaphore set from the system.
    pub fn destroy(&self) -> Result<()> {
        Errno::result(unsafe { libc::semctl(self.sem_id, 0, libc::IPC_RMID) })
            .map(drop)
            .map_err(|errno| RaceError::Lock {
                op: "semctl(IPC_RMID)",
                errno,
            })
    }

    fn semop(&self, delta: libc::c_short, op: &'static str) -> Result<()> {
        let mut sbuf = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: libc::SEM_UNDO as libc::c_short,
        };
        loop {
            match Errno::result(unsafe { libc::semop(self.sem_id, &mut sbuf, 1) }) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(RaceError::Lock { op, errno }),
            }
        }
    }
}

/// Proof of ownership of a [`SemLock`]; releases on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: SemLock,
    saved_mask: SigSet,
    released: bool,
}

impl LockGuard {
    /// Release the lock, reporting failure to the caller.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.unlock()
    }

    fn unlock(&self) -> Result<()> {
        let result = self.lock.semop(1, "release");
        restore_mask(&self.saved_mask);
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.unlock() {
            // Nobody else can make progress if the lock stays taken.
            tracing::error!(error = %e, "Failed to release race lock");
            std::process::exit(1);
        }
    }
}

fn block_termination() -> Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(MASKED_SIGNAL);
    let mut saved = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut saved)).map_err(|errno| {
        RaceError::Lock {
            op: "pthread_sigmask",
            errno,
        }
    })?;
    Ok(saved)
}

fn restore_mask(saved: &SigSet) {
    if let Err(errno) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(saved), None) {
        tracing::warn!(error = %errno, "Failed to restore signal mask");
    }
}
