//! Engine-owned retirement records.
//!
//! A record is allocated by the engine at `retire` and carries the list
//! link, the per-record reader count and a type-erased destructor. The user
//! object itself is never written to after retirement; readers that still
//! hold a pre-retire borrow see it unchanged until the destructor runs.

use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Type-erased destructor for a retired allocation.
pub(crate) type DropFn = unsafe fn(*mut ());

pub(crate) struct Retired {
    /// Next record in the slot's list. Written once before the publishing
    /// CAS, immutable afterwards.
    pub(crate) next: *mut Retired,
    /// Number of readers that were inside the slot when this record was
    /// published. Each of them decrements exactly once on leave.
    pub(crate) refs: AtomicUsize,
    object: *mut (),
    drop_fn: DropFn,
}

// SAFETY: the payload behind `object` is required to be Send at
// construction; the record itself is only mutated through `refs`.
unsafe impl Send for Retired {}
unsafe impl Sync for Retired {}

impl Retired {
    /// Wrap an owned allocation in a fresh record.
    pub(crate) fn boxed<T: Send + 'static>(garbage: Box<T>) -> *mut Retired {
        unsafe fn drop_box<T>(object: *mut ()) {
            // SAFETY: `object` came from Box::into_raw in `boxed` and is
            // destroyed at most once by the reclamation protocol.
            unsafe { drop(Box::from_raw(object as *mut T)) }
        }
        Self::raw(Box::into_raw(garbage) as *mut (), drop_box::<T>)
    }

    /// Wrap a raw payload with an explicit destructor. Used for batch link
    /// records whose "destructor" releases one batch reference.
    pub(crate) fn raw(object: *mut (), drop_fn: DropFn) -> *mut Retired {
        Box::into_raw(Box::new(Retired {
            next: ptr::null_mut(),
            refs: AtomicUsize::new(0),
            object,
            drop_fn,
        }))
    }

    /// Run the destructor and free the record.
    ///
    /// # Safety
    ///
    /// `rec` must have been produced by [`Retired::boxed`] or
    /// [`Retired::raw`] and must not be reachable from any slot list.
    pub(crate) unsafe fn destroy(rec: *mut Retired) {
        // SAFETY: per the contract, we hold the only reference.
        let rec = unsafe { Box::from_raw(rec) };
        unsafe { (rec.drop_fn)(rec.object) }
    }

    /// Free the record shell without touching the payload. Used when a push
    /// found the slot idle and the payload is handled elsewhere.
    ///
    /// # Safety
    ///
    /// `rec` must be unpublished and unaliased.
    pub(crate) unsafe fn discard(rec: *mut Retired) {
        // SAFETY: per the contract, the record was never published.
        drop(unsafe { Box::from_raw(rec) });
    }
}

/// Walk `[head, stop)` decrementing each record once; a decrement that
/// reaches zero destroys the record and its payload.
///
/// `next` is read before the decrement: the moment this reader's decrement
/// lands, the record may be destroyed by a concurrent walker. The record
/// cannot be destroyed earlier, because its count still includes us.
///
/// # Safety
///
/// The caller must have been counted in the `refs` of every record in
/// `[head, stop)`, i.e. the range must be exactly the records published to
/// the slot while the caller was inside it.
pub(crate) unsafe fn walk_decrement(head: *mut Retired, stop: *mut Retired) {
    let mut cur = head;
    while cur != stop {
        debug_assert!(!cur.is_null(), "retirement list ended before the handle");
        if cur.is_null() {
            return;
        }
        // SAFETY: `cur` is alive: our pending decrement keeps refs > 0.
        let next = unsafe { (*cur).next };
        if unsafe { (*cur).refs.fetch_sub(1, Ordering::AcqRel) } == 1 {
            // SAFETY: count reached zero, every counted reader has passed.
            unsafe { Retired::destroy(cur) };
        }
        cur = next;
    }
}
