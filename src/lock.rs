//! Distributed reader-writer lock arrays and the wait-or-die arbiter.
//!
//! One write-lock word per 32 bytes of hashed address space, holding either
//! `UNLOCKED` or the owning tid. Reader presence lives in a separate bit
//! matrix striped so that each thread owns a disjoint word region: a thread
//! arriving on its own bit never contends with another thread's arrival, and
//! a plain exchange suffices where fetch-or would otherwise be needed.
//!
//! Collisions are intentional: two addresses hashing to the same widx behave
//! as aliased, which over-serializes but never breaks serializability.

use crate::clock::{ConflictClock, NO_TIMESTAMP, TimestampBoard};
use crate::descriptor::OpDesc;
use crate::registry::{self, MAX_THREADS};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU64, Ordering};

/// Number of write locks. Must be a power of two.
#[cfg(feature = "lock-table-18")]
pub const NUM_RWL: usize = 1 << 18;
/// Number of write locks. Must be a power of two.
#[cfg(all(feature = "lock-table-20", not(feature = "lock-table-18")))]
pub const NUM_RWL: usize = 1 << 20;
/// Number of write locks. Must be a power of two.
#[cfg(not(any(feature = "lock-table-18", feature = "lock-table-20")))]
pub const NUM_RWL: usize = 1 << 22;

/// Write-lock word value meaning "no writer". Never a valid tid.
pub(crate) const UNLOCKED: u64 = (1 << 16) - 1;

/// Read-indicator words owned by each thread.
const RI_WORDS_PER_THREAD: usize = NUM_RWL / 64;

/// Total size of the read-indicator matrix, in 64-bit words.
const NUM_RI_WORDS: usize = RI_WORDS_PER_THREAD * MAX_THREADS;

/// Hash an address to its write-lock index: one lock per 32 bytes.
#[inline]
pub(crate) fn widx_of(addr: usize) -> usize {
    (addr >> 5) & (NUM_RWL - 1)
}

/// Word of the read-indicator matrix holding bit `(widx, tid)`.
#[inline]
fn ridx_of(widx: usize, tid: u16) -> usize {
    tid as usize * RI_WORDS_PER_THREAD + widx / 64
}

/// Bit for `widx` within its read-indicator word.
#[inline]
fn ribit(widx: usize) -> u64 {
    1 << (widx % 64)
}

pub(crate) struct LockTable {
    wlocks: Box<[AtomicU64]>,
    read_indicators: Box<[AtomicU64]>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        let wlocks = (0..NUM_RWL)
            .map(|_| AtomicU64::new(UNLOCKED))
            .collect::<Box<[_]>>();
        // The indicator matrix is large and all-zero; go through the zeroed
        // allocator so its pages stay untouched until a thread first arrives.
        let zeroed = vec![0u64; NUM_RI_WORDS].into_boxed_slice();
        // SAFETY: AtomicU64 has the same in-memory representation as u64;
        // length and allocation are unchanged.
        let read_indicators = unsafe {
            let len = zeroed.len();
            let thin = Box::into_raw(zeroed) as *mut u64 as *mut AtomicU64;
            Box::from_raw(core::ptr::slice_from_raw_parts_mut(thin, len))
        };
        Self {
            wlocks,
            read_indicators,
        }
    }

    /// Acquire (or re-acquire) the read lock covering `addr`, entering the
    /// wait-or-die slow path on writer conflict. False means the arbiter
    /// chose die and the transaction must abort.
    pub(crate) fn try_read_lock(
        &self,
        clock: &ConflictClock,
        board: &TimestampBoard,
        op: &mut OpDesc,
        addr: usize,
    ) -> bool {
        let widx = widx_of(addr);
        let ridx = ridx_of(widx, op.tid);
        let ri = self.read_indicators[ridx].load(Ordering::Relaxed);
        let newri = ri | ribit(widx);
        // Already arrived means we hold this read lock.
        if newri == ri {
            return true;
        }
        op.read_set.push(widx);
        // Arrive on the indicator. Only this thread writes its own words, so
        // an exchange is enough (and cheaper than fetch_or on x86).
        self.read_indicators[ridx].swap(newri, Ordering::SeqCst);
        let wstate = self.wlocks[widx].load(Ordering::Acquire);
        if wstate == UNLOCKED || wstate == op.tid as u64 {
            return true;
        }
        self.read_lock_slow(clock, board, op, widx, ridx, newri)
    }

    /// Acquire (or re-acquire) the write lock covering `addr`, snapshotting
    /// the prior word into the undo log on success. False means die.
    pub(crate) fn try_write_lock(
        &self,
        clock: &ConflictClock,
        board: &TimestampBoard,
        op: &mut OpDesc,
        addr: usize,
    ) -> bool {
        let widx = widx_of(addr);
        let wstate = self.wlocks[widx].load(Ordering::Acquire);
        if wstate == op.tid as u64 {
            // SAFETY: we hold the write lock covering addr.
            unsafe { op.write_set.record(addr as *mut u64) };
            return true;
        }
        if wstate == UNLOCKED
            && self.wlocks[widx]
                .compare_exchange(UNLOCKED, op.tid as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            && self.is_empty(widx, op.tid)
        {
            // SAFETY: lock taken and no other reader is present.
            unsafe { op.write_set.record(addr as *mut u64) };
            return true;
        }
        // Either the lock is held, the CAS lost, or readers are present (in
        // which case the CAS may have won and the slow path inherits the
        // lock). The slow path sorts all three out.
        if self.write_lock_slow(clock, board, op, widx) {
            // SAFETY: slow path granted the lock with an empty cohort.
            unsafe { op.write_set.record(addr as *mut u64) };
            return true;
        }
        false
    }

    /// Release the write lock covering `addr` if `tid` holds it.
    pub(crate) fn unlock_write(&self, addr: *mut u64, tid: u16) {
        let widx = widx_of(addr as usize);
        if self.wlocks[widx].load(Ordering::Relaxed) == tid as u64 {
            self.wlocks[widx].store(UNLOCKED, Ordering::Release);
        }
    }

    /// Clear the reader bit `(widx, tid)` if set. Idempotent.
    pub(crate) fn unlock_read(&self, widx: usize, tid: u16) {
        let ridx = ridx_of(widx, tid);
        let ri = self.read_indicators[ridx].load(Ordering::Relaxed);
        let rmask = ribit(widx);
        if ri & rmask == 0 {
            return;
        }
        self.read_indicators[ridx].store(ri & !rmask, Ordering::Release);
    }

    /// True if no thread other than `tid` has arrived on `widx`. Scans only
    /// the registered range; a thread raises the watermark before it can set
    /// any bit.
    fn is_empty(&self, widx: usize, tid: u16) -> bool {
        let max = registry::registry().max_tid_plus_one() as u16;
        let rmask = ribit(widx);
        for itid in 0..max {
            if itid == tid {
                continue;
            }
            let ri = self.read_indicators[ridx_of(widx, itid)].load(Ordering::Acquire);
            if ri & rmask != 0 {
                return false;
            }
        }
        true
    }

    /// Announced timestamp of the current writer of `widx`, if it is someone
    /// else. `NO_TIMESTAMP` when unlocked, self-owned, or unannounced.
    fn writer_ts(&self, board: &TimestampBoard, widx: usize, tid: u16) -> (u64, u16) {
        let wstate = self.wlocks[widx].load(Ordering::Acquire);
        if wstate != UNLOCKED && wstate != tid as u64 {
            let otid = wstate as u16;
            return (board.peek(otid), otid);
        }
        (NO_TIMESTAMP, MAX_THREADS as u16)
    }

    /// Lowest announced timestamp among the writer and arrived readers of
    /// `widx`, skipping ourselves.
    fn lowest_owner_ts(&self, board: &TimestampBoard, widx: usize, tid: u16) -> (u64, u16) {
        let (mut lowest_ts, mut lowest_tid) = self.writer_ts(board, widx, tid);
        let rmask = ribit(widx);
        let max = registry::registry().max_tid_plus_one() as u16;
        for itid in 0..max {
            if itid == tid {
                continue;
            }
            if self.read_indicators[ridx_of(widx, itid)].load(Ordering::Acquire) & rmask == 0 {
                continue;
            }
            let ots = board.peek(itid);
            if ots < lowest_ts {
                lowest_ts = ots;
                lowest_tid = itid;
            }
        }
        (lowest_ts, lowest_tid)
    }

    /// Draw a timestamp on first conflict and make sure it is on the board.
    fn announce(&self, clock: &ConflictClock, board: &TimestampBoard, op: &mut OpDesc) {
        if op.my_ts == NO_TIMESTAMP {
            op.my_ts = clock.issue();
        }
        // Announcements are removed whenever we stop waiting, so re-announce
        // if needed.
        if board.is_clear(op.tid) {
            board.announce(op.tid, op.my_ts);
        }
    }

    /// Wait-or-die loop for a read acquisition: wait for the writer to leave,
    /// or die if it announced an older timestamp.
    fn read_lock_slow(
        &self,
        clock: &ConflictClock,
        board: &TimestampBoard,
        op: &mut OpDesc,
        widx: usize,
        ridx: usize,
        ri: u64,
    ) -> bool {
        self.announce(clock, board, op);
        loop {
            if self.wlocks[widx].load(Ordering::Acquire) == UNLOCKED {
                board.clear(op.tid);
                return true;
            }
            let (ots, otid) = self.writer_ts(board, widx, op.tid);
            op.opp_ts = ots;
            op.opp_tid = otid;
            if op.opp_ts < op.my_ts {
                // The writer is older: die. Depart from the indicator.
                self.read_indicators[ridx].store(ri & !ribit(widx), Ordering::Release);
                return false;
            }
            spin_loop();
        }
    }

    /// Wait-or-die loop for a write acquisition. Arrives on the indicator so
    /// competing writers see us, then loops taking the lock and checking the
    /// cohort, dying if any owner announced an older timestamp.
    fn write_lock_slow(
        &self,
        clock: &ConflictClock,
        board: &TimestampBoard,
        op: &mut OpDesc,
        widx: usize,
    ) -> bool {
        self.announce(clock, board, op);
        let ridx = ridx_of(widx, op.tid);
        let ri = self.read_indicators[ridx].load(Ordering::Relaxed);
        self.read_indicators[ridx].swap(ri | ribit(widx), Ordering::SeqCst);
        loop {
            if self.wlocks[widx].load(Ordering::Acquire) == UNLOCKED {
                let _ = self.wlocks[widx].compare_exchange(
                    UNLOCKED,
                    op.tid as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            if self.wlocks[widx].load(Ordering::Acquire) == op.tid as u64
                && self.is_empty(widx, op.tid)
            {
                // Holding the write lock subsumes any read lock we had here.
                self.read_indicators[ridx].store(ri & !ribit(widx), Ordering::Release);
                board.clear(op.tid);
                return true;
            }
            let (ots, otid) = self.lowest_owner_ts(board, widx, op.tid);
            op.opp_ts = ots;
            op.opp_tid = otid;
            if op.opp_ts < op.my_ts {
                // An older owner is announced: die. Depart and release the
                // lock if the CAS above won it.
                self.read_indicators[ridx].store(ri & !ribit(widx), Ordering::Release);
                if self.wlocks[widx].load(Ordering::SeqCst) == op.tid as u64 {
                    self.wlocks[widx].store(UNLOCKED, Ordering::Release);
                }
                return false;
            }
            spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widx_one_lock_per_32_bytes() {
        let base = 0x1000usize;
        assert_eq!(widx_of(base), widx_of(base + 31));
        assert_ne!(widx_of(base), widx_of(base + 32));
    }

    #[test]
    fn test_ridx_striping_is_disjoint_per_thread() {
        // Distinct threads never share a read-indicator word, whatever the
        // widx.
        for widx in [0usize, 1, 63, 64, NUM_RWL - 1] {
            assert_ne!(ridx_of(widx, 4), ridx_of(widx, 5));
        }
        // Within one thread, consecutive widxs pack 64 to a word.
        assert_eq!(ridx_of(0, 7), ridx_of(63, 7));
        assert_ne!(ridx_of(63, 7), ridx_of(64, 7));
    }

    #[test]
    fn test_unlock_read_is_idempotent() {
        let table = LockTable::new();
        // Releasing a bit that was never set must be a no-op.
        table.unlock_read(123, 9);
        table.unlock_read(123, 9);
        assert!(table.is_empty(123, 0));
    }

    #[test]
    fn test_unlock_write_checks_ownership() {
        let table = LockTable::new();
        let mut word = 0u64;
        let addr = &mut word as *mut u64;
        let widx = widx_of(addr as usize);
        table.wlocks[widx].store(7, Ordering::Release);
        // A different tid must not release it.
        table.unlock_write(addr, 8);
        assert_eq!(table.wlocks[widx].load(Ordering::Acquire), 7);
        table.unlock_write(addr, 7);
        assert_eq!(table.wlocks[widx].load(Ordering::Acquire), UNLOCKED);
    }
}
