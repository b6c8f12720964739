//! Global epoch counter and per-cohort participant counts.
//!
//! Participants are counted in one of three buckets, indexed by the epoch they
//! were admitted in modulo 3. While the global epoch is `E`, active
//! participants can only belong to `E` or `E - 1`, so the third bucket is
//! always empty and can be reused for `E + 1`.

use crossbeam_utils::CachePadded;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of cohort buckets (current, previous, next)
pub(crate) const BUCKETS: usize = 3;

/// First epoch handed out. Starting above zero keeps `epoch - 1` meaningful.
pub(crate) const INITIAL_EPOCH: u64 = 1;

#[inline]
fn bucket(epoch: u64) -> usize {
    (epoch % BUCKETS as u64) as usize
}

/// Epoch state shared by every participant of a collector
pub(crate) struct EpochState {
    /// Global epoch, monotonically increasing
    epoch: CachePadded<AtomicU64>,
    /// Active participants per cohort bucket
    pinned: [CachePadded<AtomicUsize>; BUCKETS],
}

impl EpochState {
    pub(crate) fn new() -> Self {
        Self {
            epoch: CachePadded::new(AtomicU64::new(INITIAL_EPOCH)),
            pinned: core::array::from_fn(|_| CachePadded::new(AtomicUsize::new(0))),
        }
    }

    /// Get the current global epoch
    #[inline]
    pub(crate) fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Register a participant in the current cohort and return its epoch.
    ///
    /// The count is published before the epoch is re-checked. If the epoch moved
    /// in between, an advancer may already have seen the bucket empty, so the
    /// registration is withdrawn and retried against the new epoch.
    pub(crate) fn enter(&self) -> u64 {
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let slot = &self.pinned[bucket(epoch)];
            slot.fetch_add(1, Ordering::SeqCst);
            if self.epoch.load(Ordering::SeqCst) == epoch {
                return epoch;
            }
            slot.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Withdraw a participant admitted in `epoch`.
    #[inline]
    pub(crate) fn leave(&self, epoch: u64) {
        let prev = self.pinned[bucket(epoch)].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "cohort: leave() without matching enter()");
    }

    /// Number of participants currently registered in `epoch`'s bucket
    #[inline]
    pub(crate) fn pinned_in(&self, epoch: u64) -> usize {
        self.pinned[bucket(epoch)].load(Ordering::SeqCst)
    }

    /// Advance `E -> E + 1` if the previous cohort has drained.
    ///
    /// Returns the epoch observed after the attempt.
    pub(crate) fn try_advance(&self) -> u64 {
        let epoch = self.current();
        if self.pinned_in(epoch - 1) != 0 {
            return epoch;
        }
        match self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => epoch + 1,
            // Someone else advanced first; either way the epoch moved on.
            Err(actual) => actual,
        }
    }
}
