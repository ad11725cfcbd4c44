//! Race state shared by every participant through a SysV segment.
//!
//! The segment is a `#[repr(C)]` header followed by one `pid_t` slot per
//! worker. Every access goes through [`RaceView`], which can only be obtained
//! by taking the race lock, so no field is ever touched outside the critical
//! section.

use super::config::WorkerId;
use super::lock::{LockGuard, SemLock};
use crate::error::{RaceError, Result};
use nix::errno::Errno;
use std::mem::size_of;
use std::ptr::{self, NonNull};

#[repr(C)]
struct RaceHeader {
    worker_count: u32,
    leader: u32,
    reports_processed: u32,
    has_winner: u32,
    winner: u32,
}

/// Bytes needed for a segment with `worker_count` pid slots.
pub fn segment_size(worker_count: u32) -> usize {
    size_of::<RaceHeader>() + worker_count as usize * size_of::<libc::pid_t>()
}

/// Point-in-time copy of the shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSnapshot {
    pub leader: WorkerId,
    pub reports_processed: u32,
    pub winner: Option<WorkerId>,
    pub worker_pids: Vec<libc::pid_t>,
}

/// A process-local attachment of the shared race segment.
#[derive(Debug)]
pub struct SharedRace {
    shm_id: i32,
    base: NonNull<RaceHeader>,
    worker_count: u32,
    lock: SemLock,
}

impl SharedRace {
    /// Allocate a zeroed segment sized for `worker_count` workers and attach it.
    pub fn create(worker_count: u32, lock: SemLock) -> Result<Self> {
        let size = segment_size(worker_count);
        let shm_id = Errno::result(unsafe { libc::shmget(libc::IPC_PRIVATE, size, 0o600) })
            .map_err(|errno| RaceError::SharedMemory { op: "shmget", errno })?;

        let base = match map_segment(shm_id) {
            Ok(base) => base,
            Err(err) => {
                let _ = remove_segment(shm_id);
                return Err(err);
            }
        };
        let race = Self {
            shm_id,
            base,
            worker_count,
            lock,
        };

        if let Err(err) = race.stamp_worker_count() {
            let _ = race.destroy();
            return Err(err);
        }
        Ok(race)
    }

    fn stamp_worker_count(&self) -> Result<()> {
        let view = self.lock()?;
        unsafe { ptr::write_volatile(&raw mut (*self.header()).worker_count, self.worker_count) };
        view.release()
    }

    /// Attach a segment created by the orchestrator.
    ///
    /// Fails if the segment is too small for `expected_workers` pid slots or
    /// was stamped for a different number of workers.
    pub fn attach(shm_id: i32, lock: SemLock, expected_workers: u32) -> Result<Self> {
        let size = segment_bytes(shm_id)?;
        if size < segment_size(expected_workers) {
            let slots = size.saturating_sub(size_of::<RaceHeader>()) / size_of::<libc::pid_t>();
            return Err(RaceError::SegmentMismatch {
                expected: expected_workers,
                found: u32::try_from(slots).unwrap_or(u32::MAX),
            });
        }

        let base = map_segment(shm_id)?;
        let mut race = Self {
            shm_id,
            base,
            worker_count: 0,
            lock,
        };

        let view = race.lock()?;
        let found = unsafe { ptr::read_volatile(&raw const (*race.base.as_ptr()).worker_count) };
        view.release()?;

        if found != expected_workers {
            return Err(RaceError::SegmentMismatch {
                expected: expected_workers,
                found,
            });
        }
        race.worker_count = found;
        Ok(race)
    }

    pub fn id(&self) -> i32 {
        self.shm_id
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// Enter the critical section.
    pub fn lock(&self) -> Result<RaceView<'_>> {
        let guard = self.lock.acquire()?;
        Ok(RaceView { race: self, guard })
    }

    /// Mark the segment for removal once every process has detached.
    pub fn destroy(&self) -> Result<()> {
        remove_segment(self.shm_id)
    }

    fn header(&self) -> *mut RaceHeader {
        self.base.as_ptr()
    }

    fn pid_slot(&self, index: usize) -> *mut libc::pid_t {
        debug_assert!(index < self.worker_count as usize);
        unsafe {
            self.base
                .as_ptr()
                .cast::<u8>()
                .add(size_of::<RaceHeader>())
                .cast::<libc::pid_t>()
                .add(index)
        }
    }
}

impl Drop for SharedRace {
    fn drop(&mut self) {
        let addr = self.base.as_ptr().cast::<libc::c_void>();
        if let Err(errno) = Errno::result(unsafe { libc::shmdt(addr) }) {
            tracing::warn!(shm_id = self.shm_id, error = %errno, "Failed to detach race segment");
        }
    }
}

/// The shared state as seen from inside the critical section.
///
/// Dropping the view releases the lock.
#[derive(Debug)]
pub struct RaceView<'a> {
    race: &'a SharedRace,
    guard: LockGuard,
}

impl RaceView<'_> {
    pub fn publish_leader(&self, leader: WorkerId) {
        unsafe { ptr::write_volatile(&raw mut (*self.race.header()).leader, leader.get()) }
    }

    /// Bump the consumed-report counter and return the new value.
    pub fn increment_reports_processed(&self) -> u32 {
        let next = self.read_reports_processed().saturating_add(1);
        unsafe { ptr::write_volatile(&raw mut (*self.race.header()).reports_processed, next) };
        next
    }

    pub fn publish_winner(&self, winner: WorkerId) {
        let header = self.race.header();
        unsafe {
            ptr::write_volatile(&raw mut (*header).winner, winner.get());
            ptr::write_volatile(&raw mut (*header).has_winner, 1);
        }
    }

    pub fn register_worker_pid(&self, worker: WorkerId, pid: libc::pid_t) -> Result<()> {
        if worker.get() >= self.race.worker_count {
            return Err(RaceError::UnknownWorker {
                worker: worker.get(),
                workers: self.race.worker_count,
            });
        }
        unsafe { ptr::write_volatile(self.race.pid_slot(worker.index()), pid) };
        Ok(())
    }

    pub fn read_leader(&self) -> WorkerId {
        WorkerId::new(unsafe { ptr::read_volatile(&raw const (*self.race.header()).leader) })
    }

    pub fn read_reports_processed(&self) -> u32 {
        unsafe { ptr::read_volatile(&raw const (*self.race.header()).reports_processed) }
    }

    pub fn read_winner(&self) -> Option<WorkerId> {
        let header = self.race.header();
        let decided = unsafe { ptr::read_volatile(&raw const (*header).has_winner) } != 0;
        decided.then(|| WorkerId::new(unsafe { ptr::read_volatile(&raw const (*header).winner) }))
    }

    /// Registered pids in worker order; `0` marks a slot nobody claimed yet.
    pub fn read_all_pids(&self) -> Vec<libc::pid_t> {
        (0..self.race.worker_count as usize)
            .map(|index| unsafe { ptr::read_volatile(self.race.pid_slot(index)) })
            .collect()
    }

    pub fn snapshot(&self) -> RaceSnapshot {
        RaceSnapshot {
            leader: self.read_leader(),
            reports_processed: self.read_reports_processed(),
            winner: self.read_winner(),
            worker_pids: self.read_all_pids(),
        }
    }

    /// Leave the critical section.
    pub fn release(self) -> Result<()> {
        self.guard.release()
    }
}

fn map_segment(shm_id: i32) -> Result<NonNull<RaceHeader>> {
    let addr = unsafe { libc::shmat(shm_id, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(RaceError::SharedMemory {
            op: "shmat",
            errno: Errno::last(),
        });
    }
    NonNull::new(addr.cast::<RaceHeader>()).ok_or(RaceError::SharedMemory {
        op: "shmat",
        errno: Errno::EFAULT,
    })
}

/// Size the segment was created with.
fn segment_bytes(shm_id: i32) -> Result<usize> {
    let mut ds = std::mem::MaybeUninit::<libc::shmid_ds>::zeroed();
    Errno::result(unsafe { libc::shmctl(shm_id, libc::IPC_STAT, ds.as_mut_ptr()) }).map_err(
        |errno| RaceError::SharedMemory {
            op: "shmctl(IPC_STAT)",
            errno,
        },
    )?;
    Ok(unsafe { ds.assume_init() }.shm_segsz as usize)
}

fn remove_segment(shm_id: i32) -> Result<()> {
    Errno::result(unsafe { libc::shmctl(shm_id, libc::IPC_RMID, ptr::null_mut()) })
        .map(drop)
        .map_err(|errno| RaceError::SharedMemory {
            op: "shmctl(IPC_RMID)",
            errno,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lock plus segment, removed again when the test ends.
    struct Fixture {
        race: SharedRace,
        lock: SemLock,
    }

    impl Fixture {
        fn new(workers: u32) -> Self {
            let lock = SemLock::create().expect("semget");
            let race = SharedRace::create(workers, lock).expect("shmget");
            Self { race, lock }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.race.destroy();
            let _ = self.lock.destroy();
        }
    }

    #[test]
    fn test_segment_size() {
        assert_eq!(segment_size(0), 20);
        assert_eq!(segment_size(12), 20 + 12 * 4);
    }

    #[test]
    fn test_fresh_segment_is_zeroed() {
        let fixture = Fixture::new(3);
        let view = fixture.race.lock().unwrap();
        let snapshot = view.snapshot();
        assert_eq!(snapshot.leader, WorkerId::new(0));
        assert_eq!(snapshot.reports_processed, 0);
        assert_eq!(snapshot.winner, None);
        assert_eq!(snapshot.worker_pids, vec![0, 0, 0]);
    }

    #[test]
    fn test_writes_visible_through_second_attachment() {
        let fixture = Fixture::new(4);
        {
            let view = fixture.race.lock().unwrap();
            view.publish_leader(WorkerId::new(2));
            assert_eq!(view.increment_reports_processed(), 1);
            assert_eq!(view.increment_reports_processed(), 2);
            view.register_worker_pid(WorkerId::new(3), 4242).unwrap();
            view.release().unwrap();
        }

        let other = SharedRace::attach(fixture.race.id(), fixture.lock, 4).unwrap();
        let view = other.lock().unwrap();
        assert_eq!(view.read_leader(), WorkerId::new(2));
        assert_eq!(view.read_reports_processed(), 2);
        assert_eq!(view.read_all_pids(), vec![0, 0, 0, 4242]);
    }

    #[test]
    fn test_winner_round_trip() {
        let fixture = Fixture::new(2);
        let view = fixture.race.lock().unwrap();
        assert_eq!(view.read_winner(), None);
        // Worker 0 must be distinguishable from "no winner".
        view.publish_winner(WorkerId::new(0));
        assert_eq!(view.read_winner(), Some(WorkerId::new(0)));
    }

    #[test]
    fn test_register_out_of_range_rejected() {
        let fixture = Fixture::new(2);
        let view = fixture.race.lock().unwrap();
        let err = view.register_worker_pid(WorkerId::new(2), 1).unwrap_err();
        assert!(matches!(err, RaceError::UnknownWorker { worker: 2, .. }));
    }

    #[test]
    fn test_attach_with_wrong_worker_count() {
        let fixture = Fixture::new(3);
        let err = SharedRace::attach(fixture.race.id(), fixture.lock, 5).unwrap_err();
        assert!(matches!(
            err,
            RaceError::SegmentMismatch {
                expected: 5,
                found: 3
            }
        ));
    }

    #[test]
    fn test_attach_rejects_undersized_segment() {
        let lock = SemLock::create().expect("semget");
        let shm_id = unsafe { libc::shmget(libc::IPC_PRIVATE, 4096, 0o600) };
        assert!(shm_id >= 0, "shmget: {}", Errno::last());

        // Header claims far more slots than the segment can hold.
        let base = map_segment(shm_id).unwrap();
        unsafe {
            ptr::write_volatile(&raw mut (*base.as_ptr()).worker_count, 5000);
            libc::shmdt(base.as_ptr().cast());
        }

        let result = SharedRace::attach(shm_id, lock, 5000);
        let _ = remove_segment(shm_id);
        let _ = lock.destroy();

        assert!(segment_size(5000) > 4096);
        assert!(matches!(
            result.unwrap_err(),
            RaceError::SegmentMismatch {
                expected: 5000,
                found: 1019
            }
        ));
    }

    #[test]
    fn test_attach_reads_segment_size() {
        let fixture = Fixture::new(6);
        assert_eq!(segment_bytes(fixture.race.id()).unwrap(), segment_size(6));
    }

    #[test]
    fn test_view_holds_lock() {
        let fixture = Fixture::new(1);
        let view = fixture.race.lock().unwrap();
        assert_eq!(fixture.lock.value().unwrap(), 0);
        drop(view);
        assert_eq!(fixture.lock.value().unwrap(), 1);
    }
}
