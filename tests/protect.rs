//! Birth-era semantics of the robust Hyaline engine: era-checked `protect`,
//! cross-slot batch protection, and batch accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use petek::Stamped;
use petek::hyaline::robust::{BATCH_SIZE, Engine};

struct Counter {
    _value: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn counted(engine: &Engine, value: u64, drops: &Arc<AtomicUsize>) -> Box<Stamped<Counter>> {
    engine.alloc(Counter {
        _value: value,
        drops: drops.clone(),
    })
}

/// Allocate until the global era moves. Bounded so a regression fails loudly
/// instead of hanging.
fn advance_era(engine: &Engine) {
    let start = engine.era();
    for i in 0..10_000u64 {
        drop(engine.alloc(i).into_inner());
        if engine.era() > start {
            return;
        }
    }
    panic!("era did not advance");
}

#[test]
fn protect_returns_borrow_at_stable_era() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    let mut worker = engine.register();

    let node = counted(&engine, 42, &drops);
    let shared = AtomicPtr::new(Box::into_raw(node));

    {
        let session = worker.session();
        let borrowed = session.protect(&shared).expect("era has not moved");
        assert_eq!(borrowed._value, 42);
    }

    // Cleanup through the engine.
    let node = unsafe { Box::from_raw(shared.swap(std::ptr::null_mut(), Ordering::AcqRel)) };
    let mut session = worker.session();
    session.retire_stamped(node);
}

#[test]
fn protect_rejects_objects_born_after_snapshot() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    let mut reader = engine.register();

    let session = reader.session();
    let snapshot = session.era();

    // Advance the era well past the session's snapshot, then publish an
    // object born in the future relative to the reader.
    advance_era(&engine);
    let newborn = counted(&engine, 7, &drops);
    assert!(newborn.birth() > snapshot);
    let shared = AtomicPtr::new(Box::into_raw(newborn));

    // First attempt: the era moved, so the engine refuses the borrow and
    // republishes the reader's era.
    assert!(session.protect(&shared).is_none());
    // Second attempt: the reader's view is current again.
    let borrowed = session.protect(&shared).expect("view refreshed");
    assert_eq!(borrowed._value, 7);

    drop(session);
    let node = unsafe { Box::from_raw(shared.swap(std::ptr::null_mut(), Ordering::AcqRel)) };
    let mut session = reader.session();
    session.retire_stamped(node);
}

#[test]
fn protect_null_is_none() {
    let engine = Engine::new(1);
    let mut worker = engine.register();
    let shared: AtomicPtr<Stamped<u64>> = AtomicPtr::new(std::ptr::null_mut());
    let session = worker.session();
    assert!(session.protect(&shared).is_none());
}

#[test]
fn batch_waits_for_readers_of_other_slots() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    let mut reader = engine.register();
    let mut writer = engine.register();
    assert_ne!(reader.slot(), writer.slot());

    let session = reader.session();

    // The writer retires and seals while the reader is inside another slot.
    for i in 0..10 {
        writer.retire_stamped(counted(&engine, i, &drops));
    }
    writer.flush();
    assert_eq!(
        drops.load(Ordering::SeqCst),
        0,
        "batch must wait for the reader's slot to drain"
    );

    drop(session);
    assert_eq!(drops.load(Ordering::SeqCst), 10, "reader's exit released the batch");
}

#[test]
fn full_batch_seals_automatically() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    let mut writer = engine.register();

    // No reader anywhere: a sealed batch dies on the spot.
    for i in 0..BATCH_SIZE as u64 {
        writer.retire_stamped(counted(&engine, i, &drops));
    }
    assert_eq!(drops.load(Ordering::SeqCst), BATCH_SIZE);
}

#[test]
fn partial_batch_flushes_on_worker_drop() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    {
        let mut writer = engine.register();
        for i in 0..5 {
            writer.retire_stamped(counted(&engine, i, &drops));
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0, "partial batch still queued");
    }
    assert_eq!(drops.load(Ordering::SeqCst), 5, "drop flushed the partial batch");
}

#[test]
fn unstamped_retire_goes_through_batches_too() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(2);
    let mut worker = engine.register();
    for i in 0..3u64 {
        worker.retire(Box::new(Counter {
            _value: i,
            drops: drops.clone(),
        }));
    }
    worker.flush();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn concurrent_protect_and_retire() {
    const WRITES: usize = 2000;

    let drops = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(4);
    let shared = AtomicPtr::new(Box::into_raw(counted(&engine, 0, &drops)));

    std::thread::scope(|scope| {
        // Readers: protect and read under sessions, refreshing on None.
        for _ in 0..2 {
            let engine = &engine;
            let shared = &shared;
            scope.spawn(move || {
                let mut worker = engine.register();
                for _ in 0..WRITES {
                    let session = worker.session();
                    if let Some(node) = session.protect(shared) {
                        std::hint::black_box(node._value);
                    }
                }
            });
        }

        // Writer: swap in fresh nodes, retire the old ones.
        let drops = drops.clone();
        let engine = &engine;
        let shared = &shared;
        scope.spawn(move || {
            let mut worker = engine.register();
            for i in 1..=WRITES {
                let next = Box::into_raw(counted(engine, i as u64, &drops));
                let old = shared.swap(next, Ordering::AcqRel);
                let mut session = worker.session();
                // SAFETY: `old` was just unlinked from the only root.
                session.retire_stamped(unsafe { Box::from_raw(old) });
            }
        });
    });

    // Reclaim the final node and drain.
    let last = unsafe { Box::from_raw(shared.swap(std::ptr::null_mut(), Ordering::AcqRel)) };
    drop(last);
    drop(engine);
    assert_eq!(drops.load(Ordering::SeqCst), WRITES + 1);
}
