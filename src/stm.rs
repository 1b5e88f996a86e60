//! STM core: global runtime state, transaction lifecycle, and the driver.
//!
//! A transaction moves through BEGIN -> body -> (COMMIT | ABORT -> BEGIN).
//! Abort is a cheap deep unwind: the arbiter's die decision rolls the undo
//! log back, releases every lock, reclaims transactional allocations, and
//! resumes unwinding with a private zero-sized payload that only the driver
//! catches. Foreign panics pass through untouched.

use crate::clock::{ConflictClock, NO_TIMESTAMP, TimestampBoard};
use crate::descriptor::{DescriptorSlot, OpDesc};
use crate::lock::LockTable;
use crate::registry::{self, MAX_THREADS};
use core::cell::Cell;
use core::fmt;
use core::ptr;
use core::sync::atomic::Ordering;
use crossbeam_utils::Backoff;
use once_cell::race::OnceBox;
use std::panic::{self, AssertUnwindSafe};

/// Process-global STM runtime.
pub(crate) struct Stm {
    pub(crate) clock: ConflictClock,
    pub(crate) board: TimestampBoard,
    pub(crate) locks: LockTable,
    descs: Box<[DescriptorSlot]>,
}

static GLOBAL: OnceBox<Stm> = OnceBox::new();

#[inline]
pub(crate) fn global() -> &'static Stm {
    GLOBAL.get_or_init(|| Box::new(Stm::new()))
}

thread_local! {
    /// Descriptor of the in-flight transaction, or null. The interposed
    /// scalar's hot path reads this to decide plain access vs. lock manager.
    static CURRENT: Cell<*mut OpDesc> = const { Cell::new(ptr::null_mut()) };
}

/// Descriptor of the transaction in flight on this thread, if any.
///
/// The returned reference is re-derived on every call and must not be held
/// across another `current_op` call; all uses are short straight-line scopes
/// on the owning thread.
#[inline]
pub(crate) fn current_op() -> Option<&'static mut OpDesc> {
    // During thread teardown TLS may be gone; treat that as "no transaction".
    let p = CURRENT.try_with(Cell::get).unwrap_or(ptr::null_mut());
    // SAFETY: non-null means this thread published its own descriptor via
    // set_current; only the owning thread ever dereferences it.
    unsafe { p.as_mut() }
}

#[inline]
pub(crate) fn set_current(p: *mut OpDesc) {
    let _ = CURRENT.try_with(|c| c.set(p));
}

/// Unwind payload distinguishing an arbiter-driven abort from a user panic.
pub(crate) struct TxAbort;

impl Stm {
    fn new() -> Self {
        Self {
            clock: ConflictClock::new(),
            board: TimestampBoard::new(),
            locks: LockTable::new(),
            descs: (0..MAX_THREADS as u16).map(DescriptorSlot::new).collect(),
        }
    }

    #[inline]
    pub(crate) fn descriptor(&self, tid: u16) -> &DescriptorSlot {
        &self.descs[tid as usize]
    }

    /// BEGIN: clear the logs and, on a retry, wait for the opponent that
    /// forced the previous die to retire its timestamp from the board.
    pub(crate) fn begin(&self, op: &mut OpDesc) {
        op.alloc_log.reset();
        op.retire_log.reset();
        op.write_set.reset();
        op.read_set.reset();
        if op.attempt > 0 {
            self.wait_for_conflicting(op);
        }
        op.attempt += 1;
    }

    /// COMMIT: release all locks, free retired objects, reset the descriptor.
    /// Once here, nothing can abort anymore.
    pub(crate) fn end(&self, op: &mut OpDesc) {
        let tid = op.tid;
        for addr in op.write_set.addrs() {
            self.locks.unlock_write(addr, tid);
        }
        for widx in op.read_set.widxs() {
            self.locks.unlock_read(widx, tid);
        }
        op.retire_log.drain_free();
        // The allocation log is discarded: the objects are live now.
        op.alloc_log.reset();
        self.descriptor(tid).commits.fetch_add(1, Ordering::Relaxed);
        op.attempt = 0;
        self.board.clear(tid);
        op.my_ts = NO_TIMESTAMP;
        op.opp_ts = NO_TIMESTAMP;
        op.opp_tid = MAX_THREADS as u16;
        op.write_set.reset();
        op.read_set.reset();
    }

    /// ABORT: replay the undo log in reverse while the write locks are still
    /// held, release all locks, then reclaim this attempt's allocations.
    pub(crate) fn abort(&self, op: &mut OpDesc, roll_back: bool) {
        if roll_back {
            // SAFETY: every recorded word is still covered by a write lock we
            // hold.
            unsafe { op.write_set.rollback() };
        }
        for addr in op.write_set.addrs() {
            self.locks.unlock_write(addr, op.tid);
        }
        for widx in op.read_set.widxs() {
            self.locks.unlock_read(widx, op.tid);
        }
        op.alloc_log.drain_reclaim();
        // The retirement log is discarded: destructors already ran, but the
        // memory stays live for the retry.
        op.retire_log.reset();
        self.descriptor(op.tid).aborts.fetch_add(1, Ordering::Relaxed);
        op.write_set.reset();
        op.read_set.reset();
    }

    /// Spin until the opponent that forced the die retires its announced
    /// timestamp. Dying guaranteed `opp_ts < my_ts`, so the opponent never
    /// waits on us in return: no deadlock, and the oldest transaction in the
    /// system is never the one spinning here. A voluntary abort through the
    /// raw door records no opponent; nothing to wait for then.
    fn wait_for_conflicting(&self, op: &OpDesc) {
        if op.opp_ts == NO_TIMESTAMP || op.opp_ts >= op.my_ts {
            return;
        }
        debug_assert!((op.opp_tid as usize) < MAX_THREADS);
        let backoff = Backoff::new();
        while self.board.peek(op.opp_tid) == op.opp_ts {
            backoff.snooze();
        }
    }
}

/// Abort the in-flight transaction and unwind back to the driver, which will
/// re-run BEGIN and the user block.
pub(crate) fn abort_and_restart(op: &mut OpDesc) -> ! {
    global().abort(op, true);
    panic::resume_unwind(Box::new(TxAbort))
}

/// Run `body` as a transaction, retrying on abort until it commits. A nested
/// invocation executes the block inline in the enclosing transaction.
pub(crate) fn run_transaction<F, R>(mut body: F) -> R
where
    F: FnMut() -> R,
{
    if current_op().is_some() {
        return body();
    }
    let tid = registry::get_tid();
    let stm = global();
    let opp = stm.descriptor(tid).op_ptr();
    // SAFETY: this thread owns the descriptor for its tid and no other
    // reference into it is live outside the short scopes below.
    unsafe { (*opp).ensure_capacity() };
    set_current(opp);
    loop {
        unsafe { stm.begin(&mut *opp) };
        match panic::catch_unwind(AssertUnwindSafe(&mut body)) {
            Ok(ret) => {
                unsafe { stm.end(&mut *opp) };
                set_current(ptr::null_mut());
                return ret;
            }
            Err(payload) => {
                if !payload.is::<TxAbort>() {
                    // A user panic: the abort machinery never ran, so the
                    // transactional state is indeterminate. Surface it.
                    set_current(ptr::null_mut());
                    panic::resume_unwind(payload);
                }
                // Arbiter-driven die; begin() waits out the opponent.
            }
        }
    }
}

/// Aggregated commit/abort counters across all threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Total committed transactions.
    pub commits: u64,
    /// Total aborted transaction attempts.
    pub aborts: u64,
}

impl Stats {
    /// Aborted attempts per committed transaction.
    pub fn abort_ratio(&self) -> f64 {
        self.aborts as f64 / (1 + self.commits) as f64
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "commits={} aborts={} abort_ratio={:.1}%",
            self.commits,
            self.aborts,
            100.0 * self.abort_ratio()
        )
    }
}

/// Snapshot the process-wide transaction counters.
pub fn stats() -> Stats {
    let stm = global();
    let mut out = Stats {
        commits: 0,
        aborts: 0,
    };
    for tid in 0..MAX_THREADS as u16 {
        let slot = stm.descriptor(tid);
        out.commits += slot.commits.load(Ordering::Relaxed);
        out.aborts += slot.aborts.load(Ordering::Relaxed);
    }
    out
}
