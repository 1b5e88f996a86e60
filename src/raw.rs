//! Low-level transaction door.
//!
//! Split begin/lock/end/abort operations for integrating external
//! concurrency controls that drive the transaction lifecycle themselves.
//! Not intended for end users: the [`crate::read_tx`]/[`crate::update_tx`]
//! drivers are the supported surface, and nothing here protects against
//! misuse such as ending a transaction that was never begun.

use crate::registry;
use crate::stm;
use core::ptr;

/// Begin (or, after [`abort_tx`], re-begin) a transaction on this thread.
///
/// Clears the transaction logs, waits out a recorded conflicting opponent,
/// and marks the thread in-flight. Nesting is not supported through the door;
/// a second `begin_tx` without an intervening [`end_tx`] re-begins the same
/// transaction.
pub fn begin_tx() {
    let tid = registry::get_tid();
    let stm = stm::global();
    let opp = stm.descriptor(tid).op_ptr();
    // SAFETY: this thread owns its descriptor; no other reference is live.
    unsafe {
        (*opp).ensure_capacity();
        stm::set_current(opp);
        stm.begin(&mut *opp);
    }
}

/// Commit the transaction in flight on this thread and clear the in-flight
/// marker.
pub fn end_tx() {
    let stm = stm::global();
    if let Some(op) = stm::current_op() {
        stm.end(op);
        stm::set_current(ptr::null_mut());
    }
}

/// Abort the transaction in flight on this thread.
///
/// With `roll_back`, the undo log is replayed first. The in-flight marker and
/// the retry counter stay set, mirroring the driver's abort-then-begin cycle:
/// the external driver is expected to call [`begin_tx`] again (which waits
/// out the opponent) or [`end_tx`] to walk away.
pub fn abort_tx(roll_back: bool) {
    let stm = stm::global();
    if let Some(op) = stm::current_op() {
        stm.abort(op, roll_back);
    }
}

/// Acquire the read lock covering `addr` for the in-flight transaction.
///
/// `len` is accepted for interface compatibility and ignored: interposition
/// is word-granular. Outside a transaction this is a no-op returning true.
pub fn try_read_lock(addr: *const u8, len: usize) -> bool {
    let _ = len;
    match stm::current_op() {
        None => true,
        Some(op) => {
            let stm = stm::global();
            stm.locks
                .try_read_lock(&stm.clock, &stm.board, op, addr as usize)
        }
    }
}

/// Acquire the write lock covering `addr` for the in-flight transaction,
/// snapshotting the prior word into the undo log.
///
/// `len` is accepted for interface compatibility and ignored. Outside a
/// transaction this is a no-op returning true.
pub fn try_write_lock(addr: *const u8, len: usize) -> bool {
    let _ = len;
    match stm::current_op() {
        None => true,
        Some(op) => {
            let stm = stm::global();
            stm.locks
                .try_write_lock(&stm.clock, &stm.board, op, addr as usize)
        }
    }
}
