//! Per-transaction read and write (undo) logs.
//!
//! The read set records which reader bits this transaction set so commit and
//! abort can release them. The write set is an undo log: one snapshot of the
//! prior word per write-lock acquisition, replayed in reverse on abort.
//! Both are bounded; overflow is a programmer error surfaced immediately.

/// Capacity of the per-transaction read set.
pub const MAX_READ_SET_ENTRIES: usize = 64 * 1024;

/// Capacity of the per-transaction write (undo) set.
pub const MAX_WRITE_SET_ENTRIES: usize = 128 * 1024;

/// Write-lock indexes whose reader bit this transaction owns.
pub(crate) struct ReadSet {
    entries: Vec<u32>,
}

impl ReadSet {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Reserve the full capacity up front so pushes never reallocate
    /// mid-transaction.
    pub(crate) fn ensure_capacity(&mut self) {
        if self.entries.capacity() == 0 {
            self.entries.reserve_exact(MAX_READ_SET_ENTRIES);
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub(crate) fn push(&mut self, widx: usize) {
        assert!(
            self.entries.len() < MAX_READ_SET_ENTRIES,
            "kidem: read-set overflow, raise MAX_READ_SET_ENTRIES"
        );
        self.entries.push(widx as u32);
    }

    #[inline]
    pub(crate) fn widxs(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|&w| w as usize)
    }
}

pub(crate) struct WriteEntry {
    addr: *mut u64,
    prior: u64,
}

/// Undo log of words modified during the transaction.
pub(crate) struct WriteSet {
    entries: Vec<WriteEntry>,
}

impl WriteSet {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn ensure_capacity(&mut self) {
        if self.entries.capacity() == 0 {
            self.entries.reserve_exact(MAX_WRITE_SET_ENTRIES);
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }

    /// Snapshot the word at `addr` before it is overwritten. Called once per
    /// write-lock acquisition; repeated stores append repeated snapshots, and
    /// reverse replay makes the first-taken one win.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads of `u64` and this thread must hold the
    /// write lock covering it.
    #[inline]
    pub(crate) unsafe fn record(&mut self, addr: *mut u64) {
        assert!(
            self.entries.len() < MAX_WRITE_SET_ENTRIES,
            "kidem: write-set overflow, raise MAX_WRITE_SET_ENTRIES"
        );
        let prior = unsafe { addr.read() };
        self.entries.push(WriteEntry { addr, prior });
    }

    /// Restore every snapshotted word, newest first. Multiple writes to one
    /// address resolve to the pre-transaction value.
    ///
    /// # Safety
    ///
    /// All recorded addresses must still be valid and write-locked by this
    /// thread.
    pub(crate) unsafe fn rollback(&self) {
        for entry in self.entries.iter().rev() {
            unsafe { entry.addr.write(entry.prior) };
        }
    }

    #[inline]
    pub(crate) fn addrs(&self) -> impl Iterator<Item = *mut u64> + '_ {
        self.entries.iter().map(|e| e.addr)
    }
}
