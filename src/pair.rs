//! The `(head, count)` atomic pair at the heart of a Hyaline slot.
//!
//! The low 64 bits hold the retirement-list head pointer, the high 64 bits
//! the number of readers currently inside the slot. Keeping both halves in
//! one 128-bit word means that entering, publishing a retirement and the
//! last-leaver reset are each a single atomic step: there is no window in
//! which the count and the list head disagree.

use core::sync::atomic::Ordering;
use portable_atomic::AtomicU128;

pub(crate) struct HeadPair {
    data: AtomicU128,
}

impl HeadPair {
    pub(crate) const fn new() -> Self {
        Self {
            data: AtomicU128::new(0),
        }
    }

    #[inline]
    fn pack(head: u64, count: u64) -> u128 {
        (head as u128) | ((count as u128) << 64)
    }

    #[inline]
    fn unpack(v: u128) -> (u64, u64) {
        (v as u64, (v >> 64) as u64)
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> (u64, u64) {
        Self::unpack(self.data.load(order))
    }

    /// Register one reader. Returns the pair observed by the increment, so
    /// the head half is the pre-entry snapshot the reader uses as its handle.
    #[inline]
    pub(crate) fn enter(&self) -> (u64, u64) {
        Self::unpack(self.data.fetch_add(1u128 << 64, Ordering::AcqRel))
    }

    /// Full-pair CAS. AcqRel on success: a successful publish releases the
    /// record it links in, a successful claim acquires every record claimed.
    #[inline]
    pub(crate) fn compare_exchange_weak(
        &self,
        current: (u64, u64),
        new: (u64, u64),
    ) -> Result<(u64, u64), (u64, u64)> {
        self.data
            .compare_exchange_weak(
                Self::pack(current.0, current.1),
                Self::pack(new.0, new.1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(Self::unpack)
            .map_err(Self::unpack)
    }
}
