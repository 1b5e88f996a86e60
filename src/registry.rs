//! Thread registry: dense small-integer thread ids.
//!
//! The first transactional action on a thread claims the lowest free slot in
//! a fixed-size table and caches the id in a thread-local. A `Drop` impl on
//! the thread-local releases the slot when the thread exits, so ids are
//! recycled. Claiming is wait-free bounded by `MAX_THREADS`; release is
//! wait-free population-oblivious.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::cell::Cell;

/// Maximum number of live threads that can execute transactions.
pub const MAX_THREADS: usize = 256;

pub(crate) struct ThreadRegistry {
    used: [AtomicBool; MAX_THREADS],
    /// Highest claimed tid plus one. Raised monotonically so owner scans can
    /// stop early instead of walking all `MAX_THREADS` slots.
    max_tid_plus_one: AtomicUsize,
}

impl ThreadRegistry {
    const fn new() -> Self {
        Self {
            used: [const { AtomicBool::new(false) }; MAX_THREADS],
            max_tid_plus_one: AtomicUsize::new(0),
        }
    }

    /// Claim the lowest free slot. Wait-free bounded by `MAX_THREADS`.
    fn register(&self) -> u16 {
        for tid in 0..MAX_THREADS {
            if self.used[tid].load(Ordering::Acquire) {
                continue;
            }
            if self.used[tid]
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            // Raise the watermark to cover our id before any lock array
            // access can happen on this thread.
            let mut cur = self.max_tid_plus_one.load(Ordering::SeqCst);
            while cur <= tid {
                match self.max_tid_plus_one.compare_exchange(
                    cur,
                    tid + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(now) => cur = now,
                }
            }
            return tid as u16;
        }
        panic!("kidem: thread registry exhausted ({MAX_THREADS} live threads)");
    }

    /// Release a slot for reuse. Wait-free population-oblivious.
    fn deregister(&self, tid: u16) {
        self.used[tid as usize].store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn max_tid_plus_one(&self) -> usize {
        self.max_tid_plus_one.load(Ordering::Acquire)
    }
}

static REGISTRY: ThreadRegistry = ThreadRegistry::new();

#[inline]
pub(crate) fn registry() -> &'static ThreadRegistry {
    &REGISTRY
}

/// Thread-local check-in record. Dropping it (thread exit) releases the slot.
struct Checkin {
    tid: Cell<Option<u16>>,
}

impl Drop for Checkin {
    fn drop(&mut self) {
        if let Some(tid) = self.tid.get() {
            REGISTRY.deregister(tid);
        }
    }
}

thread_local! {
    static CHECKIN: Checkin = const {
        Checkin {
            tid: Cell::new(None),
        }
    };
}

/// Id of the calling thread, registering it on first use.
#[inline]
pub(crate) fn get_tid() -> u16 {
    CHECKIN.with(|c| match c.tid.get() {
        Some(tid) => tid,
        None => {
            let tid = REGISTRY.register();
            c.tid.set(Some(tid));
            tid
        }
    })
}
