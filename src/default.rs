//! Process-wide default engine.
//!
//! Most programs want exactly one Hyaline engine; this module lazily builds
//! it on first use. Programs that need several engines (or the robust or
//! interval variants) construct them directly.

use once_cell::race::OnceBox;

use crate::hyaline;

/// Slot count of the default engine.
pub const DEFAULT_SLOTS: usize = 32;

static DEFAULT: OnceBox<hyaline::Engine> = OnceBox::new();

/// The process-wide Hyaline engine, created on first use.
#[inline]
pub fn default_engine() -> &'static hyaline::Engine {
    DEFAULT.get_or_init(|| Box::new(hyaline::Engine::new(DEFAULT_SLOTS)))
}

/// Register a worker on the default engine.
#[inline]
pub fn register() -> hyaline::Worker<'static> {
    default_engine().register()
}
