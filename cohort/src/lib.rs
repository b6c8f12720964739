//! Cohort: epoch-based deferred reclamation for transactional workloads.
//!
//! A [`Collector`] tracks which *cohort* (epoch) every active participant was
//! admitted in. Objects unlinked from a shared structure are handed to
//! [`Collector::retire`] and are only released once no participant admitted at
//! or before the retirement epoch can still be running.
//!
//! # Key Features
//!
//! - **Cohort Admission**: `pin()` is a pair of atomic increments, never blocks
//! - **Bounded Lag**: the global epoch advances as soon as the previous cohort drains
//! - **Typed Retirement**: retired values are owned `T`, released through a callback
//! - **Guarded Loads**: [`Atomic`] loads produce [`Shared`] pointers tied to a [`Guard`]
//!
//! # Example
//!
//! ```rust
//! use cohort::{Atomic, Collector, Shared};
//! use std::sync::atomic::Ordering;
//!
//! let collector: Collector<Box<u64>> = Collector::new();
//! let slot = Atomic::new(Box::into_raw(Box::new(7u64)));
//!
//! {
//!     let guard = collector.pin();
//!     let ptr = slot.load(Ordering::Acquire, &guard);
//!     assert_eq!(unsafe { ptr.as_ref() }, Some(&7));
//!
//!     // Unlink, then hand ownership to the collector.
//!     let old = slot.swap(Shared::null(), Ordering::AcqRel, &guard);
//!     collector.retire(unsafe { Box::from_raw(old.as_raw()) });
//! }
//!
//! // Two epoch transitions later nobody can observe the value any more.
//! collector.try_advance();
//! collector.try_advance();
//! let mut released = 0;
//! collector.reclaim(|_| released += 1);
//! assert_eq!(released, 1);
//! ```

#![warn(missing_docs)]

mod atomic;
mod epoch;
mod guard;
mod reclaim;
mod retired;

pub use atomic::{Atomic, Shared};
pub use guard::Guard;
pub use reclaim::Collector;

// Re-export for convenience
pub use core::sync::atomic::Ordering;
