//! The robust Hyaline engine: batched retirement with birth eras.
//!
//! Retirements accumulate in a per-worker batch. A sealed batch is linked
//! into the retirement list of every slot that had readers at seal time, and
//! carries a reference counter equal to the number of slots it reached plus
//! the minimum birth era of its objects. Each slot consumes its link through
//! the ordinary per-record accounting; the consumption that drops the batch
//! counter to zero destroys the whole batch. An object therefore outlives
//! every reader that was inside any slot when it was retired, not just the
//! retiring worker's slot.
//!
//! Birth eras make `protect` possible: the engine stamps allocations with a
//! monotonically increasing era, readers publish the newest era they may
//! observe, and a batch skips slots whose published era proves their readers
//! cannot hold any of its objects. The flip side of the filter is a reader
//! obligation: shared pointers are loaded through
//! [`Session::protect`], never by a bare in-section read, so that a reader
//! can never hold an object born after its published era.

use core::cell::Cell;
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use core::sync::atomic::fence;

use crate::hyaline::engine;
use crate::hyaline::slot::Push;
use crate::reclaimer::Reclaimer;
use crate::retired::{DropFn, Retired};
use crate::stamped::Stamped;

/// Retirements per batch before it is sealed and distributed.
pub const BATCH_SIZE: usize = 64;

/// Allocations per era advance.
const ERA_FREQUENCY: u64 = 256;

/// Bias keeping a batch's counter away from zero while links are still
/// being distributed.
const REFS_BIAS: usize = 1 << (usize::BITS - 1);

struct BatchEntry {
    object: *mut (),
    drop_fn: DropFn,
    birth: u64,
}

struct SealedBatch {
    refs: AtomicUsize,
    entries: Box<[BatchEntry]>,
    min_birth: u64,
}

// SAFETY: entries hold owned garbage whose types were Send at retire time.
unsafe impl Send for SealedBatch {}
unsafe impl Sync for SealedBatch {}

impl Drop for SealedBatch {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            // SAFETY: the batch counter reached zero exactly once; each
            // entry owns its allocation.
            unsafe { (entry.drop_fn)(entry.object) };
        }
    }
}

/// Link-record destructor: one slot has fully consumed its link.
unsafe fn release_batch_ref(object: *mut ()) {
    let batch = object as *mut SealedBatch;
    // SAFETY: the link held one reference on the batch.
    if unsafe { (*batch).refs.fetch_sub(1, Ordering::AcqRel) } == 1 {
        unsafe { drop(Box::from_raw(batch)) };
    }
}

/// A Hyaline engine with birth eras and cross-slot batch retirement.
pub struct Engine {
    base: engine::Engine,
    era: AtomicU64,
    allocs: AtomicU64,
}

impl Engine {
    /// Create an engine with `slots` retirement shards.
    pub fn new(slots: usize) -> Self {
        Self {
            base: engine::Engine::new(slots),
            era: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
        }
    }

    /// Current global era.
    #[inline]
    pub fn era(&self) -> u64 {
        self.era.load(Ordering::Acquire)
    }

    /// Number of slots this engine was built with.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.base.slot_count()
    }

    /// Allocate a value stamped with its birth era.
    ///
    /// Every `ERA_FREQUENCY` allocations advance the global era, so
    /// long-lived readers eventually fall behind and `protect` makes them
    /// refresh before they can reach newer objects.
    pub fn alloc<T>(&self, value: T) -> Box<Stamped<T>> {
        let count = self.allocs.fetch_add(1, Ordering::Relaxed) + 1;
        if count % ERA_FREQUENCY == 0 {
            self.era.fetch_add(1, Ordering::Release);
        }
        Box::new(Stamped::new(self.era(), value))
    }

    /// Register a worker on a free slot.
    ///
    /// # Panics
    ///
    /// Panics when every slot is taken.
    pub fn register(&self) -> Worker<'_> {
        Worker {
            inner: self.base.register(),
            engine: self,
            batch: Vec::with_capacity(BATCH_SIZE),
        }
    }

    /// Seal a full (or flushed) batch and distribute it across the slots
    /// that can still hold references to its objects.
    fn seal(&self, entries: Vec<BatchEntry>) {
        if entries.is_empty() {
            return;
        }
        let min_birth = entries.iter().map(|e| e.birth).min().unwrap_or(0);
        let batch = Box::into_raw(Box::new(SealedBatch {
            refs: AtomicUsize::new(REFS_BIAS),
            entries: entries.into_boxed_slice(),
            min_birth,
        }));

        // Pairs with the SeqCst era publications of readers: after this
        // fence the scan sees every era published before the objects were
        // unlinked.
        fence(Ordering::SeqCst);

        let mut pushed = 0usize;
        for slot in self.base.slots.iter() {
            if slot.era() < min_birth {
                // Readers of this slot cannot observe any batch object.
                continue;
            }
            let link = Retired::raw(batch as *mut (), release_batch_ref);
            // SAFETY: `link` is fresh and unpublished.
            match unsafe { slot.push(link) } {
                Push::Published(_) => pushed += 1,
                // SAFETY: never published; the batch reference it would
                // have held is simply not added.
                Push::Idle => unsafe { Retired::discard(link) },
            }
        }

        // Swap the bias for the real link count. If every linked slot has
        // already drained (or none was linked at all), the batch dies here.
        let adjust = pushed.wrapping_sub(REFS_BIAS);
        // SAFETY: the batch outlives the bias: the counter cannot reach
        // zero before this adjustment.
        let old = unsafe { (*batch).refs.fetch_add(adjust, Ordering::AcqRel) };
        if old.wrapping_add(adjust) == 0 {
            // SAFETY: counter reached zero, all links are consumed.
            unsafe { drop(Box::from_raw(batch)) };
        }
    }
}

/// A registered participant of a robust Hyaline [`Engine`].
pub struct Worker<'e> {
    inner: engine::Worker<'e>,
    engine: &'e Engine,
    batch: Vec<BatchEntry>,
}

// SAFETY: batch entries hold owned garbage that was Send at retire time.
unsafe impl Send for Worker<'_> {}

impl<'e> Worker<'e> {
    /// The slot this worker operates on.
    #[inline]
    pub fn slot(&self) -> usize {
        self.inner.slot()
    }

    /// Enter a critical section, publishing the current era for this slot.
    pub fn begin_op(&mut self) -> engine::Handle {
        let handle = self.inner.begin_op();
        let era = self.engine.era();
        self.engine.base.slots[self.inner.slot()].publish_era(era);
        handle
    }

    /// Leave the critical section.
    pub fn end_op(&mut self, handle: engine::Handle) {
        self.inner.end_op(handle);
    }

    /// Retire an unstamped allocation. It is treated as born at era zero,
    /// which disables the era filter for its batch (always safe, never
    /// eager).
    pub fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: produced by Box::into_raw below, destroyed once.
            unsafe { drop(Box::from_raw(object as *mut T)) }
        }
        let object = Box::into_raw(garbage) as *mut ();
        self.retire_entry(BatchEntry {
            object,
            drop_fn: drop_box::<T>,
            birth: 0,
        });
    }

    /// Retire a stamped allocation, keeping its birth era for the filter.
    pub fn retire_stamped<T: Send + 'static>(&mut self, garbage: Box<Stamped<T>>) {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: produced by Box::into_raw below, destroyed once.
            unsafe { drop(Box::from_raw(object as *mut Stamped<T>)) }
        }
        let birth = garbage.birth();
        let object = Box::into_raw(garbage) as *mut ();
        self.retire_entry(BatchEntry {
            object,
            drop_fn: drop_box::<T>,
            birth,
        });
    }

    fn retire_entry(&mut self, entry: BatchEntry) {
        self.batch.push(entry);
        if self.batch.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    /// Seal and submit the partial batch immediately.
    pub fn flush(&mut self) {
        let entries = core::mem::take(&mut self.batch);
        self.engine.seal(entries);
    }

    /// RAII critical section with era-checked [`protect`](Session::protect).
    pub fn session(&mut self) -> Session<'_, 'e> {
        let handle = self.inner.begin_op();
        let era = self.engine.era();
        self.engine.base.slots[self.inner.slot()].publish_era(era);
        Session {
            worker: self,
            handle,
            era: Cell::new(era),
        }
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        // A partial batch must still go through the full protocol: another
        // slot's reader may hold borrows of these objects.
        self.flush();
    }
}

impl Reclaimer for Worker<'_> {
    type Handle = engine::Handle;

    fn begin_op(&mut self) -> engine::Handle {
        Worker::begin_op(self)
    }

    fn end_op(&mut self, handle: engine::Handle) {
        Worker::end_op(self, handle)
    }

    fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        Worker::retire(self, garbage)
    }
}

/// RAII critical section over a robust worker.
pub struct Session<'w, 'e> {
    worker: &'w mut Worker<'e>,
    handle: engine::Handle,
    /// Era snapshot this session last published.
    era: Cell<u64>,
}

impl Session<'_, '_> {
    /// The era snapshot of this session.
    #[inline]
    pub fn era(&self) -> u64 {
        self.era.get()
    }

    /// Sample a shared location and return a borrow iff the engine can
    /// certify the pointee stays live for the rest of this session.
    ///
    /// `None` means the global era moved past this session's snapshot (or
    /// the location was null). The new era has been republished, so the
    /// caller simply re-reads; the second attempt succeeds unless the era
    /// advances again.
    pub fn protect<'s, T>(&'s self, src: &AtomicPtr<Stamped<T>>) -> Option<&'s Stamped<T>> {
        let ptr = src.load(Ordering::Acquire);
        let current = self.worker.engine.era();
        if current != self.era.get() {
            self.worker.engine.base.slots[self.worker.inner.slot()].publish_era(current);
            self.era.set(current);
            return None;
        }
        // SAFETY: every object loadable here was born at or before the
        // published era, so any batch containing it linked this slot and
        // waits for us to leave.
        unsafe { ptr.as_ref() }
    }

    /// Retire from inside the session.
    pub fn retire_stamped<T: Send + 'static>(&mut self, garbage: Box<Stamped<T>>) {
        self.worker.retire_stamped(garbage)
    }

    /// Retire an unstamped allocation from inside the session.
    pub fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        self.worker.retire(garbage)
    }
}

impl Drop for Session<'_, '_> {
    fn drop(&mut self) {
        self.worker.inner.end_op(self.handle);
    }
}
