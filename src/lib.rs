//! Petek: safe memory reclamation for lock-free and lock-based concurrent
//! data structures.
//!
//! Two reclamation families behind one contract:
//!
//! - **Hyaline** ([`hyaline`]): retirement lists sharded across slots, with
//!   per-record reference counts. Reclamation is piggy-backed onto the last
//!   reader leaving a slot; there is no grace-period bookkeeping at all.
//!   The robust variant ([`hyaline::robust`]) adds birth eras and cross-slot
//!   batches.
//! - **Interval-based** ([`ibr`]): a global epoch stamped on allocation and
//!   retirement; a retired object is destroyed once no in-flight operation
//!   can still observe its interval.
//!
//! # Key properties
//!
//! - **Lock-free fast path**: entering, retiring and leaving are single
//!   atomic operations (a 128-bit CAS for Hyaline, plain loads and stores
//!   for IBR).
//! - **Engine-owned records**: the retirement link never lives inside the
//!   user object, so retired objects stay immutable until destruction.
//! - **Registration-based workers**: no global thread-local state; engines
//!   are plain values, several can coexist, and slot ids are recycled as
//!   workers come and go.
//!
//! # Example
//!
//! ```rust
//! use petek::hyaline::Engine;
//!
//! let engine = Engine::new(4);
//! let mut worker = engine.register();
//!
//! let handle = worker.begin_op();
//! // ... read shared structures, unlink a node ...
//! worker.retire(Box::new(42u64));
//! worker.end_op(handle);
//! ```

mod align;
mod pair;
mod reclaimer;
mod retired;
mod stamped;

pub mod default;
pub mod hyaline;
pub mod ibr;

pub use default::{default_engine, register};
pub use reclaimer::Reclaimer;
pub use stamped::Stamped;
