//! Core safety guarantees: no premature free while a reader is inside, and
//! misuse of the interface panics instead of corrupting memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use petek::hyaline::Engine;

struct FlaggedNode {
    value: u64,
    freed: Arc<AtomicBool>,
}

impl Drop for FlaggedNode {
    fn drop(&mut self) {
        self.freed.store(true, Ordering::SeqCst);
    }
}

#[test]
fn no_premature_free_while_reader_inside() {
    let freed = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));
    let can_check = Arc::new(AtomicBool::new(false));
    let engine = Engine::new(1);

    thread::scope(|scope| {
        // Reader: enters the slot and parks inside the critical section.
        let reader = {
            let freed = freed.clone();
            let started = started.clone();
            let can_check = can_check.clone();
            let engine = &engine;
            scope.spawn(move || {
                let mut worker = engine.attach(0);
                let handle = worker.begin_op();
                started.store(true, Ordering::Release);
                while !can_check.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                }
                // The writer has retired and left; we are still inside, so
                // the object must not have been destroyed.
                assert!(!freed.load(Ordering::SeqCst), "freed under a live reader");
                worker.end_op(handle);
            })
        };

        // Writer: retires on the same slot while the reader is inside.
        while !started.load(Ordering::Acquire) {
            thread::yield_now();
        }
        let mut writer = engine.attach(0);
        let handle = writer.begin_op();
        writer.retire(Box::new(FlaggedNode {
            value: 42,
            freed: freed.clone(),
        }));
        writer.end_op(handle);
        can_check.store(true, Ordering::Release);

        reader.join().unwrap();
    });

    // The reader left last; its sweep destroyed the object.
    assert!(freed.load(Ordering::SeqCst), "object reclaimed after quiescence");
}

#[test]
fn heavy_churn_with_shared_slots() {
    const THREADS: usize = 8;
    const OPS: usize = 2000;

    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let drops = drops.clone();
            let engine = &engine;
            scope.spawn(move || {
                let mut worker = engine.attach(t % 2);
                for i in 0..OPS {
                    let handle = worker.begin_op();
                    worker.retire(Box::new(Counter {
                        _value: i as u64,
                        drops: drops.clone(),
                    }));
                    worker.end_op(handle);
                }
            });
        }
    });

    drop(engine);
    assert_eq!(drops.load(Ordering::SeqCst), THREADS * OPS);
}

struct Counter {
    _value: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn reader_sees_value_until_it_leaves() {
    // The retired object's contents stay readable for the full section.
    let freed = Arc::new(AtomicBool::new(false));
    let engine = Engine::new(1);
    let mut reader = engine.attach(0);
    let mut writer = engine.attach(0);

    let node = Box::new(FlaggedNode {
        value: 99,
        freed: freed.clone(),
    });
    let raw: *const FlaggedNode = &*node;

    let rh = reader.begin_op();
    let wh = writer.begin_op();
    writer.retire(node);
    writer.end_op(wh);

    // SAFETY: the reader entered before the retire and has not left, so the
    // engine defers destruction.
    assert!(!freed.load(Ordering::SeqCst));
    assert_eq!(unsafe { (*raw).value }, 99);

    reader.end_op(rh);
    assert!(freed.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "begin_op while an operation is active")]
fn double_begin_panics() {
    let engine = Engine::new(1);
    let mut worker = engine.register();
    let _h = worker.begin_op();
    let _ = worker.begin_op();
}

#[test]
#[should_panic(expected = "end_op without a matching begin_op")]
fn end_without_begin_panics() {
    let engine = Engine::new(1);
    let mut worker = engine.register();
    let handle = worker.begin_op();
    worker.end_op(handle);
    worker.end_op(handle);
}

#[test]
#[should_panic(expected = "out of range")]
fn attach_out_of_range_panics() {
    let engine = Engine::new(2);
    let _ = engine.attach(2);
}

#[test]
#[should_panic(expected = "slot capacity")]
fn register_beyond_capacity_panics() {
    let engine = Engine::new(1);
    let _first = engine.register();
    let _second = engine.register();
}
