//! The reclaimer interface: the contract between a concurrent container and
//! a reclamation engine.
//!
//! The trait is trivial in code and central in design. A container thread
//! enters a critical section with [`begin_op`](Reclaimer::begin_op),
//! performs its lock-free or locked mutation, hands removed nodes to
//! [`retire`](Reclaimer::retire) and leaves with
//! [`end_op`](Reclaimer::end_op). The engine is the sole party that runs the
//! destructor of a retired object, and it does so only once every reader
//! that could still hold a pre-retire borrow has left.
//!
//! # Container obligations
//!
//! - Every read of a pointer that might be retired concurrently happens
//!   inside a `begin_op`/`end_op` span, or goes through an engine's
//!   `protect`.
//! - An object is retired at most once, and only after it is unreachable
//!   from every container root.
//! - One worker per logical thread; workers are not shared across threads
//!   mid-operation.
//!
//! Misuse (leaving without entering, entering twice, a foreign handle) is a
//! programming error. Detection is best effort and panics.

use core::fmt;

/// A reclamation participant bound to one engine.
///
/// Implemented by the worker types of all engines, so container harnesses
/// can be written once and stressed against every scheme.
pub trait Reclaimer {
    /// Opaque token returned by [`begin_op`](Reclaimer::begin_op). It
    /// carries whatever the engine needs at
    /// [`end_op`](Reclaimer::end_op) to bound its reclamation work: the
    /// pre-entry list snapshot for Hyaline, the sampled epoch for IBR.
    type Handle: Copy + fmt::Debug;

    /// Enter a critical section. Pointers reachable from the container may
    /// be dereferenced until the matching [`end_op`](Reclaimer::end_op).
    fn begin_op(&mut self) -> Self::Handle;

    /// Leave the critical section entered by the `begin_op` that produced
    /// `handle`. May perform reclamation work inline.
    fn end_op(&mut self, handle: Self::Handle);

    /// Transfer ownership of `garbage` to the engine. The value must be
    /// unreachable from every container root; its destructor will run
    /// exactly once, after every in-flight borrow has ended.
    fn retire<T: Send + 'static>(&mut self, garbage: Box<T>);
}
