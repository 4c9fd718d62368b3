//! Interval-based reclamation: a global epoch, per-thread published epochs,
//! and thread-local retirement lists.
//!
//! Every allocation made through [`Engine::alloc`] is stamped with its birth
//! epoch; every retirement is stamped with the epoch at retire time. A
//! retired object is destroyed once `retire_epoch < min_active_epoch`, the
//! minimum over all published per-worker epochs (inactive workers publish
//! [`INACTIVE`]). The minimum is computed by scanning the slot array; no
//! shortcut against the global counter is taken.
//!
//! The global epoch advances inline every
//! [`epoch_frequency`](Config::epoch_frequency) retires, from any thread via
//! [`Engine::advance_epoch`], or on a wall-clock cadence through an
//! [`EpochTicker`].

mod ticker;

pub use ticker::EpochTicker;

use std::sync::Mutex;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crate::align::CacheAligned;
use crate::reclaimer::Reclaimer;
use crate::retired::DropFn;
use crate::stamped::Stamped;

/// The epoch published by a worker with no active operation.
pub const INACTIVE: u64 = u64::MAX;

/// Tuning knobs for an interval engine.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of worker slots (fixed for the life of the engine).
    pub slots: usize,
    /// Retires between reclamation scans of the local list.
    pub empty_frequency: usize,
    /// Retires between inline advances of the global epoch.
    pub epoch_frequency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slots: 64,
            empty_frequency: 10,
            epoch_frequency: 100,
        }
    }
}

struct Record {
    object: *mut (),
    drop_fn: DropFn,
    retired_at: u64,
}

// SAFETY: records hold owned garbage that was Send at retire time.
unsafe impl Send for Record {}

impl Record {
    fn destroy(self) {
        // SAFETY: ownership is unique; the reclamation predicate (or
        // teardown) certified that no borrow can remain.
        unsafe { (self.drop_fn)(self.object) }
    }
}

/// An interval-based reclamation engine.
pub struct Engine {
    epoch: AtomicU64,
    published: Box<[CacheAligned<AtomicU64>]>,
    free: Mutex<Vec<usize>>,
    next: AtomicUsize,
    /// Records left behind by deregistered workers; destroyed at teardown.
    orphans: Mutex<Vec<Record>>,
    empty_frequency: usize,
    epoch_frequency: usize,
}

impl Engine {
    /// Create an engine with `slots` worker slots and default frequencies.
    pub fn new(slots: usize) -> Self {
        Self::with_config(Config {
            slots,
            ..Config::default()
        })
    }

    /// Create an engine from an explicit [`Config`].
    ///
    /// # Panics
    ///
    /// Panics if `slots` is zero or either frequency is zero.
    pub fn with_config(config: Config) -> Self {
        assert!(config.slots > 0, "an engine needs at least one slot");
        assert!(config.empty_frequency > 0, "empty_frequency must be nonzero");
        assert!(config.epoch_frequency > 0, "epoch_frequency must be nonzero");
        Self {
            epoch: AtomicU64::new(0),
            published: (0..config.slots)
                .map(|_| CacheAligned::new(AtomicU64::new(INACTIVE)))
                .collect(),
            free: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            orphans: Mutex::new(Vec::new()),
            empty_frequency: config.empty_frequency,
            epoch_frequency: config.epoch_frequency,
        }
    }

    /// Current global epoch.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance the global epoch; any thread may do this. Returns the new
    /// value.
    #[inline]
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Minimum published epoch across all workers, [`INACTIVE`] when every
    /// worker is quiescent. This is the lower bound on what any in-flight
    /// operation can still observe.
    pub fn min_active_epoch(&self) -> u64 {
        self.published
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .min()
            .unwrap_or(INACTIVE)
    }

    /// Allocate a value stamped with its birth epoch.
    pub fn alloc<T>(&self, value: T) -> Box<Stamped<T>> {
        Box::new(Stamped::new(self.epoch(), value))
    }

    /// Register a worker on a free slot, recycling ids of departed workers.
    ///
    /// # Panics
    ///
    /// Panics when every slot is taken.
    pub fn register(&self) -> Worker<'_> {
        let slot = self.alloc_slot();
        self.published[slot].store(INACTIVE, Ordering::Release);
        Worker {
            engine: self,
            slot,
            active: None,
            retired: Vec::new(),
            since_scan: 0,
            since_advance: 0,
        }
    }

    fn alloc_slot(&self) -> usize {
        if let Some(slot) = self.lock(&self.free).pop() {
            return slot;
        }
        loop {
            let current = self.next.load(Ordering::Relaxed);
            assert!(
                current < self.published.len(),
                "slot capacity ({}) exhausted",
                self.published.len()
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
        self.published[slot].store(INACTIVE, Ordering::Release);
        self.lock(&self.free).push(slot);
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Workers borrow the engine, so none can be alive here; everything
        // still queued belongs to the engine now.
        let orphans = core::mem::take(&mut *self.lock(&self.orphans));
        for record in orphans {
            record.destroy();
        }
    }
}

/// Opaque critical-section token: the epoch sampled at entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(u64);

impl Handle {
    /// The epoch this operation entered at.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.0
    }
}

/// A registered participant of an interval [`Engine`].
pub struct Worker<'e> {
    engine: &'e Engine,
    slot: usize,
    active: Option<Handle>,
    retired: Vec<Record>,
    since_scan: usize,
    since_advance: usize,
}

impl<'e> Worker<'e> {
    /// The published-epoch slot this worker writes.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Number of retirements still queued on this worker.
    #[inline]
    pub fn pending(&self) -> usize {
        self.retired.len()
    }

    /// Enter a critical section: sample the global epoch and publish it.
    ///
    /// # Panics
    ///
    /// Panics if an operation is already active on this worker.
    pub fn begin_op(&mut self) -> Handle {
        assert!(
            self.active.is_none(),
            "begin_op while an operation is active"
        );
        let epoch = self.engine.epoch.load(Ordering::Acquire);
        self.engine.published[self.slot].store(epoch, Ordering::Release);
        let handle = Handle(epoch);
        self.active = Some(handle);
        handle
    }

    /// Leave the critical section: publish [`INACTIVE`].
    ///
    /// # Panics
    ///
    /// Panics without a matching `begin_op`, or with a foreign handle.
    pub fn end_op(&mut self, handle: Handle) {
        match self.active.take() {
            Some(entered) => assert!(entered == handle, "end_op with a foreign handle"),
            None => panic!("end_op without a matching begin_op"),
        }
        self.engine.published[self.slot].store(INACTIVE, Ordering::Release);
    }

    /// Retire an unstamped allocation.
    pub fn retire<T: Send + 'static>(&mut self, garbage: Box<T>) {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: produced by Box::into_raw below, destroyed once.
            unsafe { drop(Box::from_raw(object as *mut T)) }
        }
        let object = Box::into_raw(garbage) as *mut ();
        self.retire_record(object, drop_box::<T>);
    }

    /// Retire a stamped allocation.
    pub fn retire_stamped<T: Send + 'static>(&mut self, garbage: Box<Stamped<T>>) {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: produced by Box::into_raw below, destroyed once.
            unsafe { drop(Box::from_raw(object as *mut Stamped<T>)) }
        }
        let object = Box::into_raw(garbage) as *mut ();
        self.retire_record(object, drop_box::<T>);
    }

    fn retire_record(&mut self, object: *mut (), drop_fn: DropFn) {
        let retired_at = self.engine.epoch.load(Ordering::Acquire);
        self.retired.push(Record {
            object,
            drop_fn,
            retired_at,
        });

        self.since_advance += 1;
        if self.since_advance >= self.engine.epoch_frequency {
            self.since_advance = 0;
            self.engine.advance_epoch();
        }
        self.since_scan += 1;
        if self.since_scan >= self.engine.empty_frequency {
            self.since_scan = 0;
            self.reclaim();
        }
    }

    /// Destroy every queued record whose retire epoch is below the minimum
    /// active epoch. Returns the number destroyed.
    pub fn reclaim(&mut self) -> usize {
        let min = self.engine.min_active_epoch();
        let mut destroyed = 0;
        let mut i = 0;
        while i < self.retired.len() {
            if self.retired[i].retired_at < min {
                self.retired.swap_remove(i).destroy();
                destroyed += 1;
            } else {
                i += 1;
            }
        }
        destroyed
    }

    /// RAII critical section with epoch-checked
    /// [`protect`](Session::protect).
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
        self.engine.published[self.slot].store(INACTIVE, Ordering::Release);
        self.active = None;
        self.reclaim();
        if !self.retired.is_empty() {
            let mut orphans = self.engine.lock(&self.engine.orphans);
            orphans.extend(self.retired.drain(..));
        }
        self.engine.release_slot(self.slot);
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

/// RAII critical section over an interval worker.
pub struct Session<'w, 'e> {
    worker: &'w mut Worker<'e>,
    handle: Handle,
}

impl Session<'_, '_> {
    /// The epoch this session currently protects from.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.handle.0
    }

    /// Sample a shared location and return a borrow iff the pointee was
    /// born at or before this session's published epoch.
    ///
    /// `None` means the object is newer than the session's view (or the
    /// location was null); call [`refresh`](Session::refresh) and re-read,
    /// or end the operation.
    pub fn protect<'s, T>(&'s self, src: &AtomicPtr<Stamped<T>>) -> Option<&'s Stamped<T>> {
        let ptr = src.load(Ordering::Acquire);
        // SAFETY: the pointee was reachable at the load, so it was not yet
        // retired; its retire epoch can only be at or above our published
        // epoch, which pins the reclamation predicate.
        let stamped = unsafe { ptr.as_ref() }?;
        if stamped.birth() > self.handle.0 {
            return None;
        }
        Some(stamped)
    }

    /// Republish the current global epoch mid-operation, bounding the
    /// interval this reader forces the engine to keep.
    ///
    /// Takes `&mut self`: every borrow handed out by
    /// [`protect`](Session::protect) must be dead, because objects retired
    /// below the new epoch become reclaimable immediately.
    pub fn refresh(&mut self) {
        let epoch = self.worker.engine.epoch.load(Ordering::Acquire);
        self.worker.engine.published[self.worker.slot].store(epoch, Ordering::Release);
        self.handle = Handle(epoch);
        self.worker.active = Some(self.handle);
    }

    /// Retire a stamped allocation from inside the session.
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
        self.worker.end_op(self.handle);
    }
}
