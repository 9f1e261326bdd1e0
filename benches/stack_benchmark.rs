//! Producer/consumer throughput measurement for the lock-free stack.
//!
//! Run with `cargo bench`. Not a statistical harness; it reports raw
//! push+pop throughput the same way the smoke binaries do.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use hazard_epoch::LockFreeStack;

#[derive(Clone, Copy)]
struct StackValue {
    a: i64,
    b: i64,
    sum: i64,
}

fn run_trial(thread_pairs: usize, loop_times: i64) {
    let stack = Arc::new(LockFreeStack::new().unwrap());
    let producers_left = Arc::new(AtomicI64::new(thread_pairs as i64));

    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..thread_pairs {
        let stack = stack.clone();
        let producers_left = producers_left.clone();
        handles.push(thread::spawn(move || {
            let sum_base = (t as i64) * loop_times;
            for i in 0..loop_times {
                stack.push(StackValue {
                    a: sum_base + i,
                    b: i,
                    sum: sum_base + 2 * i,
                });
            }
            producers_left.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    for _ in 0..thread_pairs {
        let stack = stack.clone();
        let producers_left = producers_left.clone();
        handles.push(thread::spawn(move || {
            let mut last_chance = false;
            loop {
                match stack.pop().unwrap() {
                    Some(value) => {
                        assert_eq!(value.a + value.b, value.sum, "corrupted value popped");
                        last_chance = false;
                    }
                    None => {
                        if producers_left.load(Ordering::SeqCst) == 0 {
                            if last_chance {
                                break;
                            }
                            last_chance = true;
                        }
                        std::hint::spin_loop();
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let elapsed = start.elapsed();
    let ops = 2 * thread_pairs as i64 * loop_times;
    println!(
        "threads={}+{} push+pop={} time={:?} tps={:.0} ops/sec",
        thread_pairs,
        thread_pairs,
        ops,
        elapsed,
        ops as f64 / elapsed.as_secs_f64()
    );
}

fn main() {
    println!("\n=== hazard-epoch stack throughput ===\n");
    let loop_times = 200_000;
    for thread_pairs in [1, 2, 4] {
        run_trial(thread_pairs, loop_times);
    }
}
