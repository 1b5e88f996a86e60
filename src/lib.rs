//! Kidem: starvation-free software transactional memory.
//!
//! Kidem implements two-phase locking over a distributed reader-writer lock
//! array with per-word undo logging. Conflicts are arbitrated wait-or-die
//! against a global conflict clock: a transaction never waits on a strictly
//! older one, so there are no deadlocks, the oldest transaction in the system
//! is never aborted, and every transaction commits within a bounded number of
//! retries.
//!
//! # Key Properties
//!
//! - **No commit-time validation**: locks are held for the duration of the
//!   transaction, so commit is release-only and can never fail.
//! - **Bounded restarts**: wait-die caps aborts per transaction at the number
//!   of registered threads.
//! - **Transactional allocation**: [`tm_new`]/[`tm_delete`] integrate the
//!   allocator with rollback, so an aborted transaction leaks nothing and a
//!   committed retirement frees exactly once.
//!
//! # Example
//!
//! ```rust
//! use kidem::{TCell, update_tx};
//!
//! let balance = TCell::new(100u64);
//!
//! let seen = update_tx(|| {
//!     let v = balance.load();
//!     balance.store(v + 1);
//!     v
//! });
//!
//! assert_eq!(seen, 100);
//! assert_eq!(balance.load(), 101);
//! ```
//!
//! Transactions abort by unwinding, so the crate requires `panic = "unwind"`.
//! User panics are not caught: a panic escaping the block leaves the
//! transactional state indeterminate and must not cross the transaction
//! boundary.

#![warn(missing_docs)]

mod clock;
mod descriptor;
mod lock;
mod logs;
pub mod raw;
mod reclaim;
mod registry;
mod stm;
mod tcell;

pub use lock::NUM_RWL;
pub use logs::{MAX_READ_SET_ENTRIES, MAX_WRITE_SET_ENTRIES};
pub use reclaim::{MAX_ALLOCS, MAX_RETIRES, tm_delete, tm_free, tm_malloc, tm_new};
pub use registry::MAX_THREADS;
pub use stm::{Stats, stats};
pub use tcell::{TCell, TmValue};

/// Execute `body` as an update transaction, retrying on abort until it
/// commits, and return its result.
///
/// A nested invocation (a transaction begun while one is already in flight on
/// this thread) executes the block inline in the enclosing transaction.
pub fn update_tx<F, R>(body: F) -> R
where
    F: FnMut() -> R,
{
    stm::run_transaction(body)
}

/// Execute `body` as a read transaction.
///
/// Currently equivalent to [`update_tx`]; the split exists so read-only
/// transactions can be specialized later without changing callers.
pub fn read_tx<F, R>(body: F) -> R
where
    F: FnMut() -> R,
{
    stm::run_transaction(body)
}
