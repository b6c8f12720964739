//! Region counters.

use crossbeam_utils::CachePadded;
use core::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a region's activity, from [`Region::stats`](crate::Region::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionStats {
    /// Transactions that ended committed (read-only ones included)
    pub commits: u64,
    /// Transactions that ended aborted
    pub aborts: u64,
    /// Segments reachable through the region (the permanent one included)
    pub live_segments: usize,
    /// Unlinked segments waiting for their cohort to drain
    pub pending_reclamation: usize,
    /// Segments physically released so far
    pub reclaimed: u64,
    /// Current reclamation epoch
    pub epoch: u64,
    /// Bytes held by segments, live or pending
    pub bytes_in_use: usize,
}

/// Hot counters, padded apart since every `end` bumps one of them.
#[derive(Default)]
pub(crate) struct Counters {
    commits: CachePadded<AtomicU64>,
    aborts: CachePadded<AtomicU64>,
    reclaimed: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn record(&self, committed: bool) {
        let counter = if committed { &self.commits } else { &self.aborts };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reclaimed(&self, count: u64) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub(crate) fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    pub(crate) fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let counters = Counters::default();
        counters.record(true);
        counters.record(true);
        counters.record(false);
        counters.record_reclaimed(3);
        assert_eq!(counters.commits(), 2);
        assert_eq!(counters.aborts(), 1);
        assert_eq!(counters.reclaimed(), 3);
    }
}
