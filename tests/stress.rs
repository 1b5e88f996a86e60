use kidem::{TCell, read_tx, update_tx};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[repr(align(64))]
struct Aligned(TCell<i64>);

#[test]
#[cfg_attr(miri, ignore)]
fn test_contended_counter_is_exact() {
    let counter = Arc::new(Aligned(TCell::new(0)));
    let threads: i64 = 8;
    let increments: i64 = 10_000;

    let mut handles = vec![];
    for _ in 0..threads {
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..increments {
                update_tx(|| {
                    let v = counter.0.load();
                    counter.0.store(v + 1);
                });
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.0.load(), threads * increments);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_bank_transfer_conserves_total() {
    let num_accounts = 10usize;
    let accounts: Arc<Vec<Aligned>> = Arc::new(
        (0..num_accounts)
            .map(|_| Aligned(TCell::new(1_000)))
            .collect(),
    );
    let done = Arc::new(AtomicBool::new(false));

    // Auditors sum all accounts concurrently: two-phase locking must give
    // every read transaction a consistent snapshot.
    let mut auditors = vec![];
    for _ in 0..2 {
        let accounts = accounts.clone();
        let done = done.clone();
        auditors.push(thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                let total: i64 = read_tx(|| accounts.iter().map(|a| a.0.load()).sum());
                assert_eq!(total, num_accounts as i64 * 1_000);
            }
        }));
    }

    let mut movers = vec![];
    for _ in 0..4 {
        let accounts = accounts.clone();
        movers.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for _ in 0..5_000 {
                let from = rng.random_range(0..num_accounts);
                let to = rng.random_range(0..num_accounts);
                let amount = rng.random_range(1..10i64);
                update_tx(|| {
                    let from_bal = accounts[from].0.load();
                    if from_bal >= amount {
                        accounts[from].0.store(from_bal - amount);
                        let to_bal = accounts[to].0.load();
                        accounts[to].0.store(to_bal + amount);
                    }
                });
            }
        }));
    }

    for h in movers {
        h.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for h in auditors {
        h.join().unwrap();
    }

    let total: i64 = read_tx(|| accounts.iter().map(|a| a.0.load()).sum());
    assert_eq!(total, num_accounts as i64 * 1_000);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_swaps_preserve_pair() {
    let a = Arc::new(Aligned(TCell::new(1)));
    let b = Arc::new(Aligned(TCell::new(2)));

    let mut handles = vec![];
    for _ in 0..4 {
        let a = a.clone();
        let b = b.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..1_000 {
                update_tx(|| {
                    let va = a.0.load();
                    let vb = b.0.load();
                    a.0.store(vb);
                    b.0.store(va);
                });
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let (va, vb) = read_tx(|| (a.0.load(), b.0.load()));
    assert!(
        (va == 1 && vb == 2) || (va == 2 && vb == 1),
        "unexpected: a={va}, b={vb}"
    );
}
