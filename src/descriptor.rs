//! Per-thread operation descriptor.

use crate::clock::NO_TIMESTAMP;
use crate::logs::{ReadSet, WriteSet};
use crate::reclaim::{AllocLog, RetireLog};
use crate::registry::MAX_THREADS;
use core::cell::UnsafeCell;
use core::sync::atomic::AtomicU64;

/// Transactional state of one thread. Only the owning thread touches it;
/// cross-thread observation goes through the atomic counters on
/// [`DescriptorSlot`] and the timestamp board.
pub(crate) struct OpDesc {
    pub(crate) tid: u16,
    /// Retry counter; zero iff no transaction is in flight on this thread.
    pub(crate) attempt: u64,
    /// Timestamp drawn on first conflict, kept across retries until commit.
    pub(crate) my_ts: u64,
    /// Timestamp and id of the opponent that forced the last die.
    pub(crate) opp_ts: u64,
    pub(crate) opp_tid: u16,
    pub(crate) read_set: ReadSet,
    pub(crate) write_set: WriteSet,
    pub(crate) alloc_log: AllocLog,
    pub(crate) retire_log: RetireLog,
}

impl OpDesc {
    const fn new(tid: u16) -> Self {
        Self {
            tid,
            attempt: 0,
            my_ts: NO_TIMESTAMP,
            opp_ts: NO_TIMESTAMP,
            opp_tid: MAX_THREADS as u16,
            read_set: ReadSet::new(),
            write_set: WriteSet::new(),
            alloc_log: AllocLog::new(),
            retire_log: RetireLog::new(),
        }
    }

    /// Reserve all log buffers. Called once per thread, before its first
    /// transaction, so the hot path never allocates.
    pub(crate) fn ensure_capacity(&mut self) {
        self.read_set.ensure_capacity();
        self.write_set.ensure_capacity();
        self.alloc_log.ensure_capacity();
        self.retire_log.ensure_capacity();
    }
}

/// One descriptor plus its externally readable counters.
#[repr(align(128))]
pub(crate) struct DescriptorSlot {
    op: UnsafeCell<OpDesc>,
    pub(crate) commits: AtomicU64,
    pub(crate) aborts: AtomicU64,
}

// SAFETY: `op` is only ever accessed by the thread owning the slot's tid
// (its raw log pointers included); the counters are atomics.
unsafe impl Send for DescriptorSlot {}
unsafe impl Sync for DescriptorSlot {}

impl DescriptorSlot {
    pub(crate) fn new(tid: u16) -> Self {
        Self {
            op: UnsafeCell::new(OpDesc::new(tid)),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Raw pointer to the descriptor.
    ///
    /// Dereferencing is only sound on the owning thread, and only while no
    /// other reference into the descriptor is live.
    #[inline]
    pub(crate) fn op_ptr(&self) -> *mut OpDesc {
        self.op.get()
    }
}
