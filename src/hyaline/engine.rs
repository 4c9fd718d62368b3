//! The plain Hyaline engine: per-slot retirement lists with per-record
//! reference counts, reclamation piggy-backed onto readers leaving the slot.
//!
//! Protection is slot-scoped: a reader is shielded against every retirement
//! published to *its* slot after it entered. Containers that retire and read
//! on different slots need the cross-slot batches of
//! [`robust`](super::robust), or an outer lock that serialises mutation (the
//! single-global-lock harnesses do the latter).

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::align::CacheAligned;
use crate::hyaline::slot::{Push, Slot};
use crate::reclaimer::Reclaimer;
use crate::retired::Retired;

/// A Hyaline reclamation engine with a fixed number of slots.
///
/// The slot array is sized at construction and never resized. Workers are
/// handed out by [`register`](Engine::register), which recycles slot ids, or
/// by [`attach`](Engine::attach) for harnesses that manage their own
/// thread-to-slot mapping (several workers may share a slot; the reader
/// counts make that safe).
pub struct Engine {
    pub(crate) slots: Box<[CacheAligned<Slot>]>,
    free: Mutex<Vec<usize>>,
    next: AtomicUsize,
}

impl Engine {
    /// Create an engine with `slots` retirement shards.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is zero.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "an engine needs at least one slot");
        Self {
            slots: (0..slots).map(|_| CacheAligned::new(Slot::new())).collect(),
            free: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of slots this engine was built with.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Register a worker on a free slot, recycling ids released by earlier
    /// workers.
    ///
    /// # Panics
    ///
    /// Panics when every slot is taken.
    pub fn register(&self) -> Worker<'_> {
        let slot = self.alloc_slot();
        Worker {
            engine: self,
            slot,
            owned: true,
            active: None,
        }
    }

    /// Attach a worker to an explicit slot, bypassing the allocator.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn attach(&self, slot: usize) -> Worker<'_> {
        assert!(
            slot < self.slots.len(),
            "slot {slot} out of range (engine has {})",
            self.slots.len()
        );
        Worker {
            engine: self,
            slot,
            owned: false,
            active: None,
        }
    }

    fn alloc_slot(&self) -> usize {
        if let Some(slot) = self.free_list().pop() {
            return slot;
        }
        // CAS loop: only advance the counter on success, so it stays valid
        // if the assert unwinds and is caught.
        loop {
            let current = self.next.load(Ordering::Relaxed);
            assert!(
                current < self.slots.len(),
                "slot capacity ({}) exhausted",
                self.slots.len()
            );
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(_) => continue,
            }
        }
    }

    fn release_slot(&self, slot: usize) {
        self.free_list().push(slot);
    }

    fn free_list(&self) -> std::sync::MutexGuard<'_, Vec<usize>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Wait for every reader to leave. A section that is never ended
        // (e.g. a forgotten session) pins its slot and deadlocks teardown;
        // that failure mode is documented rather than papered over.
        for slot in self.slots.iter() {
            while slot.readers() != 0 {
                std::hint::spin_loop();
            }
            // The last leaver always claims the list, so a quiescent slot is
            // an empty slot.
            debug_assert!(slot.head_is_null(), "quiescent slot with queued records");
        }
    }
}

/// Opaque critical-section token: the retirement-list snapshot at entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle {
    pub(crate) head: *mut Retired,
}

/// A registered participant of a Hyaline [`Engine`].
pub struct Worker<'e> {
    engine: &'e Engine,
    slot: usize,
    owned: bool,
    active: Option<Handle>,
}

// SAFETY: a worker is used by one thread at a time; the handle's raw pointer
// is a token into state the engine synchronises.
unsafe impl Send for Worker<'_> {}

impl<'e> Worker<'e> {
    /// The slot this worker operates on.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Enter a critical section.
    ///
    /// # Panics
    ///
    /// Panics if an operation is already active on this worker.
    pub fn begin_op(&mut self) -> Handle {
        assert!(
            self.active.is_none(),
            "begin_op while an operation is active"
        );
        let handle = Handle {
            head: self.engine.slots[self.slot].enter(),
        };
        self.active = Some(handle);
        handle
    }

    /// Leave the critical section entered by the matching
    /// [`begin_op`](Worker::begin_op). May reclaim inline.
    ///
    /// # Panics
    ///
    /// Panics without a matching `begin_op`, or with a foreign handle.
    pub fn end_op(&mut self, handle: Handle) {
        match self.active.take() {
            Some(entered) => assert!(entered == handle, "end_op with a foreign handle"),
            None => panic!("end_op without a matching begin_op"),
        }
        self.engine.slots[self.slot].leave(handle.head);
    }

    /// Hand `garbage` to the engine for deferred destruction.
    ///
    /// If the slot has no readers at all, nothing can hold a borrow of the
    /// value and it is destroyed on the spot.
    pub fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        let rec = Retired::boxed(garbage);
        // SAFETY: `rec` is freshly allocated and unpublished.
        unsafe { self.retire_record(rec) };
    }

    /// # Safety
    ///
    /// `rec` must be fresh and unpublished.
    pub(crate) unsafe fn retire_record(&mut self, rec: *mut Retired) {
        match unsafe { self.engine.slots[self.slot].push(rec) } {
            Push::Published(_) => {}
            // SAFETY: never published, we still own it exclusively.
            Push::Idle => unsafe { Retired::destroy(rec) },
        }
    }

    /// RAII critical section; [`end_op`](Worker::end_op) runs on drop.
    pub fn session(&mut self) -> Session<'_, 'e> {
        let handle = self.begin_op();
        Session {
            worker: self,
            handle,
        }
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        debug_assert!(
            self.active.is_none(),
            "worker dropped inside a critical section"
        );
        if let Some(handle) = self.active.take() {
            self.engine.slots[self.slot].leave(handle.head);
        }
        if self.owned {
            self.engine.release_slot(self.slot);
        }
    }
}

impl Reclaimer for Worker<'_> {
    type Handle = Handle;

    fn begin_op(&mut self) -> Handle {
        Worker::begin_op(self)
    }

    fn end_op(&mut self, handle: Handle) {
        Worker::end_op(self, handle)
    }

    fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        Worker::retire(self, garbage)
    }
}

/// RAII wrapper around one `begin_op`/`end_op` span.
pub struct Session<'w, 'e> {
    worker: &'w mut Worker<'e>,
    handle: Handle,
}

impl Session<'_, '_> {
    /// The handle of the enclosing critical section.
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Retire from inside the section.
    pub fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        self.worker.retire(garbage)
    }
}

impl Drop for Session<'_, '_> {
    fn drop(&mut self) {
        self.worker.end_op(self.handle);
    }
}
