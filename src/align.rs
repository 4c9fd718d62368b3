//! Cache-line padding for shared slot arrays.
//!
//! Slots are written by every participating thread, so adjacent slots must
//! not share a cache line. Alignment per architecture: x86_64 64B,
//! aarch64 128B (M-series / Neoverse prefetch pairs), s390x 256B.

use core::ops::Deref;

#[cfg(target_arch = "s390x")]
#[repr(align(256))]
pub(crate) struct CacheAligned<T> {
    data: T,
}

#[cfg(target_arch = "aarch64")]
#[repr(align(128))]
pub(crate) struct CacheAligned<T> {
    data: T,
}

#[cfg(not(any(target_arch = "s390x", target_arch = "aarch64")))]
#[repr(align(64))]
pub(crate) struct CacheAligned<T> {
    data: T,
}

impl<T> CacheAligned<T> {
    pub(crate) fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.data
    }
}
