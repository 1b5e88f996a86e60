//! Conflict clock and timestamp board.
//!
//! The clock is the single source of transaction timestamps. The board holds
//! one announcement slot per thread, each on its own cache line; the arbiter
//! reads opponents' slots to decide wait-or-die, and a retrying transaction
//! spins on its opponent's slot during begin.

use crate::registry::MAX_THREADS;
use core::sync::atomic::{AtomicU64, Ordering};

/// Sentinel meaning "no timestamp announced".
pub(crate) const NO_TIMESTAMP: u64 = u64::MAX;

/// Monotonic source of transaction timestamps, starting at 1.
pub(crate) struct ConflictClock {
    ticks: AtomicU64,
}

impl ConflictClock {
    pub(crate) const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(1),
        }
    }

    /// Draw the next timestamp. Sequentially consistent so timestamps are
    /// totally ordered across threads.
    #[inline]
    pub(crate) fn issue(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst)
    }
}

/// One announcement slot, isolated on its own cache line.
#[repr(align(128))]
struct BoardSlot(AtomicU64);

/// Per-thread published-timestamp array.
pub(crate) struct TimestampBoard {
    slots: Box<[BoardSlot]>,
}

impl TimestampBoard {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_THREADS)
                .map(|_| BoardSlot(AtomicU64::new(NO_TIMESTAMP)))
                .collect(),
        }
    }

    /// Publish `ts` in the slot for `tid`. A swap keeps the store ordered
    /// against the subsequent owner scans on the slow path.
    #[inline]
    pub(crate) fn announce(&self, tid: u16, ts: u64) {
        self.slots[tid as usize].0.swap(ts, Ordering::SeqCst);
    }

    /// Remove the announcement for `tid`.
    #[inline]
    pub(crate) fn clear(&self, tid: u16) {
        self.slots[tid as usize]
            .0
            .store(NO_TIMESTAMP, Ordering::Release);
    }

    /// Currently announced timestamp of `tid`.
    #[inline]
    pub(crate) fn peek(&self, tid: u16) -> u64 {
        self.slots[tid as usize].0.load(Ordering::SeqCst)
    }

    /// Cheap self-check used before re-announcing.
    #[inline]
    pub(crate) fn is_clear(&self, tid: u16) -> bool {
        self.slots[tid as usize].0.load(Ordering::Relaxed) == NO_TIMESTAMP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_monotonic() {
        let clock = ConflictClock::new();
        let a = clock.issue();
        let b = clock.issue();
        assert!(a >= 1);
        assert!(b > a);
    }

    #[test]
    fn test_board_announce_clear() {
        let board = TimestampBoard::new();
        assert!(board.is_clear(3));
        board.announce(3, 42);
        assert_eq!(board.peek(3), 42);
        assert!(!board.is_clear(3));
        board.clear(3);
        assert_eq!(board.peek(3), NO_TIMESTAMP);
    }
}
