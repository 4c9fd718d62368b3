//! Single-global-lock hash-map stress driver.
//!
//! Usage: `stress [THREADS]` (default 4). Each thread hammers a mutex-guarded
//! map with mixed inserts and removes, retiring removed values through a
//! reclamation worker, and the driver prints throughput for both engine
//! families.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use petek::Reclaimer;
use petek::{hyaline, ibr};

const OBJECTS: usize = 10_000;

/// Minimal splitmix-style generator; the workload only needs uniform keys.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

fn churn<R: Reclaimer>(worker: &mut R, map: &Mutex<HashMap<u64, Box<u64>>>, seed: u64, ops: usize) {
    let mut rng = Rng(seed);
    for i in 0..ops {
        let key = rng.next() % OBJECTS as u64 + 1;
        let value = rng.next();
        let handle = worker.begin_op();
        if i % 2 == 0 {
            let mut guard = map.lock().unwrap();
            if let Some(old) = guard.insert(key, Box::new(value)) {
                drop(guard);
                worker.retire(old);
            }
        } else {
            let removed = map.lock().unwrap().remove(&key);
            if let Some(old) = removed {
                worker.retire(old);
            }
        }
        worker.end_op(handle);
    }
}

fn run<R, F>(name: &str, threads: usize, make_worker: F)
where
    R: Reclaimer + Send,
    F: Fn(usize) -> R + Sync,
{
    let map = Mutex::new(HashMap::new());
    let start = Instant::now();
    std::thread::scope(|scope| {
        for i in 0..threads {
            let mut worker = make_worker(i);
            let map = &map;
            scope.spawn(move || {
                churn(&mut worker, map, 0x5EED ^ i as u64, OBJECTS / threads);
            });
        }
    });
    let elapsed = start.elapsed();
    let throughput = OBJECTS as f64 / elapsed.as_secs_f64();
    println!("{name}: Threads: {threads} | Throughput: {throughput:.0} ops/sec");
}

fn main() {
    let threads: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(4);
    println!("The thread count is: {threads}");

    let engine = hyaline::Engine::new(threads);
    run("hyaline", threads, |i| engine.attach(i));

    let robust = hyaline::robust::Engine::new(threads);
    run("hyaline-s", threads, |_| robust.register());

    let interval = ibr::Engine::new(threads);
    run("ibr", threads, |_| interval.register());
}
