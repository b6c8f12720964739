//! Collector: cohort admission, retirement and deferred release.
//!
//! - `pin`: admit a participant into the current cohort
//! - `retire`: queue an unlinked value, stamped with the current epoch
//! - `try_advance`: move the global epoch once the previous cohort drained
//! - `reclaim`: release every value two or more epochs behind

use crate::epoch::EpochState;
use crate::guard::Guard;
use crate::retired::{Retired, RetiredList};
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

/// Epoch-based collector owning values retired by its participants.
///
/// `T` is whatever the caller needs released: a `Box`, a handle carrying a
/// raw pointer with a `Drop` impl, or a plain token. Values still queued when
/// the collector is dropped are dropped with it.
pub struct Collector<T> {
    epochs: EpochState,
    retired: Mutex<RetiredList<T>>,
    /// Mirrors `retired.len()` so `reclaim` can skip the lock when idle
    pending: AtomicUsize,
}

impl<T> Collector<T> {
    /// Create a collector at the initial epoch with nothing retired.
    pub fn new() -> Self {
        Self {
            epochs: EpochState::new(),
            retired: Mutex::new(RetiredList::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Enter the current cohort.
    ///
    /// Never blocks: admission is a counter increment plus an epoch re-check.
    #[inline]
    pub fn pin(&self) -> Guard<'_> {
        Guard::enter(&self.epochs)
    }

    /// The current global epoch.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epochs.current()
    }

    /// Number of retired values not yet released.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue `value` for release.
    ///
    /// The caller must already have made `value` unreachable for participants
    /// that pin from now on; participants pinned earlier may still use it.
    pub fn retire(&self, value: T) {
        let mut retired = self.retired.lock();
        // Read under the lock so the list stays sorted by epoch.
        let epoch = self.epochs.current();
        retired.push(Retired::new(epoch, value));
        self.pending.fetch_add(1, Ordering::Release);
    }

    /// Advance the global epoch if the previous cohort has drained.
    ///
    /// Returns the epoch observed after the attempt.
    #[inline]
    pub fn try_advance(&self) -> u64 {
        self.epochs.try_advance()
    }

    /// Hand every expired value to `release`, returning how many were released.
    ///
    /// `release` runs after the internal lock is dropped, so it may retire
    /// further values.
    pub fn reclaim<F>(&self, mut release: F) -> usize
    where
        F: FnMut(T),
    {
        if self.pending() == 0 {
            return 0;
        }

        let epoch = self.try_advance();
        let expired = self.retired.lock().take_expired(epoch);
        let count = expired.len();
        if count == 0 {
            return 0;
        }
        self.pending.fetch_sub(count, Ordering::Release);

        tracing::trace!(epoch, count, "cohort: releasing expired values");
        for entry in expired {
            release(entry.value);
        }
        count
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collector")
            .field("epoch", &self.epoch())
            .field("pending", &self.pending())
            .finish()
    }
}
