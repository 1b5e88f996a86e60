//! Disjoint workloads never conflict: exact counts, zero aborts.

use kidem::{TCell, update_tx};
use std::sync::Arc;
use std::thread;

/// Keeps each counter's word in its own lock stripe (one lock covers 32
/// bytes of address space).
#[repr(align(64))]
struct Aligned(TCell<u64>);

#[test]
#[cfg_attr(miri, ignore)]
fn test_disjoint_counters_commit_without_aborts() {
    let before = kidem::stats();

    let a = Arc::new(Aligned(TCell::new(0)));
    let b = Arc::new(Aligned(TCell::new(0)));
    const N: u64 = 1_000_000;

    let ta = {
        let a = a.clone();
        thread::spawn(move || {
            for _ in 0..N {
                update_tx(|| {
                    let v = a.0.load();
                    a.0.store(v + 1);
                });
            }
        })
    };
    let tb = {
        let b = b.clone();
        thread::spawn(move || {
            for _ in 0..N {
                update_tx(|| {
                    let v = b.0.load();
                    b.0.store(v + 1);
                });
            }
        })
    };

    ta.join().unwrap();
    tb.join().unwrap();

    assert_eq!(a.0.load(), N);
    assert_eq!(b.0.load(), N);

    let after = kidem::stats();
    assert_eq!(after.commits - before.commits, 2 * N);
    assert_eq!(after.aborts - before.aborts, 0);
}
