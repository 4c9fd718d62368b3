//! Hyaline slot: one shard of retirement state per concurrent participant.
//!
//! A slot is a 128-bit `(head, count)` pair plus the newest era its readers
//! have published (used only by the robust engine). All protocol steps are
//! single CASes on the pair:
//!
//! - enter: add one to the count, the observed head is the handle
//! - retire: link a record in front of the head, count unchanged
//! - leave: count > 1 decrements; count == 1 swings the pair to `(null, 0)`,
//!   claiming the whole list and resetting the slot in the same step
//!
//! Every leaver then walks the records published during its own stay,
//! `[observed head, handle)`, decrementing each once. A record's count was
//! fixed to the number of readers inside the slot at publish time, so the
//! decrement that reaches zero destroys it after the last possible borrower
//! has left.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::pair::HeadPair;
use crate::retired::{Retired, walk_decrement};

pub(crate) struct Slot {
    pair: HeadPair,
    /// Newest era published by a reader of this slot. Plain engines never
    /// touch it; the robust engine uses it to filter batch pushes.
    era: AtomicU64,
}

/// Outcome of publishing a record into a slot.
pub(crate) enum Push {
    /// Linked in; the value is the reader count the record was stamped with.
    Published(u64),
    /// The slot had no readers. The record was not linked; no reader can
    /// hold the payload, so the caller may destroy it immediately.
    Idle,
}

impl Slot {
    pub(crate) const fn new() -> Self {
        Self {
            pair: HeadPair::new(),
            era: AtomicU64::new(0),
        }
    }

    /// Enter the critical section; returns the pre-entry head as handle.
    #[inline]
    pub(crate) fn enter(&self) -> *mut Retired {
        let (head, _) = self.pair.enter();
        head as *mut Retired
    }

    /// Publish `rec` as the new list head.
    ///
    /// The record's count is stamped with the reader count pinned by the
    /// successful CAS, and its link is written before the release publish,
    /// so every claimer that acquires the list sees both.
    ///
    /// # Safety
    ///
    /// `rec` must be a fresh, unpublished record.
    pub(crate) unsafe fn push(&self, rec: *mut Retired) -> Push {
        let mut cur = self.pair.load(Ordering::Acquire);
        loop {
            let (head, count) = cur;
            if count == 0 {
                return Push::Idle;
            }
            // SAFETY: `rec` is unpublished, we are its only writer.
            unsafe {
                (*rec).next = head as *mut Retired;
                (*rec).refs.store(count as usize, Ordering::Relaxed);
            }
            match self.pair.compare_exchange_weak((head, count), (rec as u64, count)) {
                Ok(_) => return Push::Published(count),
                Err(observed) => cur = observed,
            }
        }
    }

    /// Leave the critical section entered with the matching `handle`.
    pub(crate) fn leave(&self, handle: *mut Retired) {
        let mut cur = self.pair.load(Ordering::Acquire);
        loop {
            let (head, count) = cur;
            debug_assert!(count >= 1, "leave without a matching enter");
            let new = if count == 1 {
                // Last reader: claim the list and reset the slot atomically.
                (0, 0)
            } else {
                (head, count - 1)
            };
            match self.pair.compare_exchange_weak((head, count), new) {
                Ok(_) => {
                    // Records older than the handle were counted without us;
                    // records in [head, handle) were counted with us and owe
                    // us one decrement each.
                    unsafe { walk_decrement(head as *mut Retired, handle) };
                    return;
                }
                Err(observed) => cur = observed,
            }
        }
    }

    /// Number of readers currently inside the slot.
    #[inline]
    pub(crate) fn readers(&self) -> u64 {
        self.pair.load(Ordering::Acquire).1
    }

    #[inline]
    pub(crate) fn head_is_null(&self) -> bool {
        self.pair.load(Ordering::Acquire).0 == 0
    }

    /// Newest era published by this slot's readers.
    #[inline]
    pub(crate) fn era(&self) -> u64 {
        self.era.load(Ordering::SeqCst)
    }

    /// Monotonically raise the slot's published era.
    #[inline]
    pub(crate) fn publish_era(&self, era: u64) {
        self.era.fetch_max(era, Ordering::SeqCst);
    }
}
