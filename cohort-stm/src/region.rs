//! The shared memory region: segment table, admission and reclamation.

use crate::addr::Addr;
use crate::admission::{Gate, IdGenerator};
use crate::config::{Admission, MAX_SEGMENT_BYTES, RegionConfig};
use crate::errors::TmError;
use crate::segment::Segment;
use crate::stats::{Counters, RegionStats};
use crate::table::SegmentTable;
use crate::transaction::{Transaction, TxId};
use cohort::{Collector, Guard};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::Backoff;
use tracing::{debug, trace, warn};

/// Slot of the segment created with the region; never freed.
pub(crate) const PERMANENT_SLOT: u32 = 0;

/// A freed segment waiting for its cohort to drain.
///
/// Committed frees retire in two steps: first with the slot still marked
/// `RETIRED` (`linked`), so read-only transactions that predate the free can
/// keep resolving it; once their cohort drained the slot is cleared and the
/// segment retired again, now unlinked, and released after the next drain.
pub(crate) struct RetiredSegment {
    slot: u32,
    bytes: usize,
    segment: NonNull<Segment>,
    /// The table still points at the segment and owns it
    linked: bool,
}

// SAFETY: the retired segment is owned exclusively by the collector.
unsafe impl Send for RetiredSegment {}

impl Drop for RetiredSegment {
    fn drop(&mut self) {
        if self.linked {
            // Still in the table, which frees it on drop.
            return;
        }
        // SAFETY: published from a Box and unlinked before retirement; the
        // collector hands it back only once no guard can still reach it.
        unsafe { drop(Box::from_raw(self.segment.as_ptr())) };
    }
}

/// Byte accounting against the optional memory limit.
struct Budget {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl Budget {
    fn charge(&self, bytes: usize) -> Result<(), TmError> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|_| TmError::OutOfMemory)
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// A shared memory region accessed through transactions.
///
/// The region owns every segment. Transactions borrow it, so it cannot be
/// dropped while one is open.
///
/// # Example
///
/// ```
/// use cohort_stm::Region;
///
/// let region = Region::create(64, 8).unwrap();
/// let start = region.start();
///
/// let mut tx = region.begin(false).unwrap();
/// tx.write(&42u64.to_ne_bytes(), start).unwrap();
/// assert!(tx.end());
///
/// let mut tx = region.begin(true).unwrap();
/// let mut buf = [0u8; 8];
/// tx.read(start, &mut buf).unwrap();
/// assert!(tx.end());
/// assert_eq!(u64::from_ne_bytes(buf), 42);
/// ```
pub struct Region {
    /// Effective word size
    align: usize,
    /// Requested size of the permanent segment
    size: usize,
    config: RegionConfig,
    pub(crate) table: SegmentTable,
    pub(crate) gate: Gate,
    pub(crate) counters: Counters,
    collector: Collector<RetiredSegment>,
    ids: IdGenerator,
    budget: Budget,
}

impl Region {
    /// Create a region whose first segment has `size` bytes of `align`-byte words.
    pub fn create(size: usize, align: usize) -> Result<Self, TmError> {
        Self::with_config(RegionConfig::new(size, align))
    }

    /// Create a region from a full configuration.
    pub fn with_config(config: RegionConfig) -> Result<Self, TmError> {
        config.validate()?;
        let align = config.effective_align();
        let region = Self {
            align,
            size: config.size(),
            table: SegmentTable::new(),
            gate: Gate::new(config.admission),
            counters: Counters::default(),
            collector: Collector::new(),
            ids: IdGenerator::new(),
            budget: Budget {
                limit: config.memory_limit,
                used: AtomicUsize::new(0),
            },
            config,
        };

        // Words are at least as wide as requested, so the permanent segment
        // may be rounded up past `size`.
        let start = region.allocate_segment(region.size.next_multiple_of(align))?;
        debug_assert_eq!(start.slot(), Some(PERMANENT_SLOT));

        debug!(
            size = region.size,
            align,
            admission = ?region.config.admission,
            "region created"
        );
        Ok(region)
    }

    /// Address of the first byte of the permanent segment.
    #[inline]
    pub fn start(&self) -> Addr {
        Addr::new(PERMANENT_SLOT, 0)
    }

    /// Size in bytes of the permanent segment, as requested at creation.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Word size in bytes: every access is a multiple of it.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// The configuration this region was created with.
    #[inline]
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// The admission policy in force.
    #[inline]
    pub fn admission(&self) -> Admission {
        self.gate.policy()
    }

    /// Begin a transaction.
    ///
    /// Under [`Admission::Exclusive`] this blocks until the gate admits it.
    pub fn begin(&self, read_only: bool) -> Result<Transaction<'_>, TmError> {
        let id = if read_only {
            TxId::READ_ONLY
        } else {
            self.ids.mint()?
        };
        let ticket = self.gate.enter(read_only);
        let guard = self.collector.pin();
        trace!(tx = id.get(), read_only, epoch = guard.epoch(), "transaction begun");
        Ok(Transaction::new(self, guard, id, read_only, ticket))
    }

    /// End `tx`, returning whether it committed. Same as [`Transaction::end`].
    pub fn end(&self, tx: Transaction<'_>) -> bool {
        tx.end()
    }

    /// Run `f` in a transaction until it commits.
    ///
    /// Conflicts retry with backoff. Any other error from `f` aborts the
    /// attempt and is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use cohort_stm::Region;
    ///
    /// let region = Region::create(8, 8).unwrap();
    /// let counter = region.start();
    ///
    /// let seen = region
    ///     .atomically(false, |tx| {
    ///         let mut buf = [0u8; 8];
    ///         tx.read(counter, &mut buf)?;
    ///         let value = u64::from_ne_bytes(buf);
    ///         tx.write(&(value + 1).to_ne_bytes(), counter)?;
    ///         Ok(value)
    ///     })
    ///     .unwrap();
    /// assert_eq!(seen, 0);
    /// ```
    pub fn atomically<F, T>(&self, read_only: bool, mut f: F) -> Result<T, TmError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, TmError>,
    {
        let backoff = Backoff::new();
        loop {
            let mut tx = self.begin(read_only)?;
            match f(&mut tx) {
                Ok(value) => {
                    if tx.end() {
                        return Ok(value);
                    }
                }
                Err(err) if err.is_retryable() => drop(tx),
                Err(err) => return Err(err),
            }
            backoff.snooze();
        }
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> RegionStats {
        RegionStats {
            commits: self.counters.commits(),
            aborts: self.counters.aborts(),
            live_segments: self.table.occupied(),
            pending_reclamation: self.collector.pending(),
            reclaimed: self.counters.reclaimed(),
            epoch: self.collector.epoch(),
            bytes_in_use: self.budget.used(),
        }
    }

    /// Release every retired segment whose cohort has drained.
    ///
    /// Runs after every `end`; exposed for callers that want to force it.
    pub fn collect(&self) -> usize {
        let mut released = 0;
        self.collector.reclaim(|mut retired| {
            if retired.linked {
                // Whoever resolved the slot until now is pinned no later than
                // the epoch the segment is retired in below.
                let guard = self.collector.pin();
                self.table.unlink(retired.slot, &guard);
                drop(guard);
                retired.linked = false;
                self.collector.retire(retired);
                return;
            }
            let (slot, bytes) = (retired.slot, retired.bytes);
            drop(retired);
            // The index may be reused only now that the segment is gone.
            self.table.recycle(slot);
            self.budget.release(bytes);
            released += 1;
        });
        if released > 0 {
            self.counters.record_reclaimed(released as u64);
            debug!(
                released,
                epoch = self.collector.epoch(),
                "reclaimed segments"
            );
        }
        released
    }

    /// Create and link a segment of `size` bytes (a multiple of the word size).
    pub(crate) fn allocate_segment(&self, size: usize) -> Result<Addr, TmError> {
        self.try_allocate(size).inspect_err(|_| {
            warn!(size, used = self.budget.used(), "segment allocation failed: out of memory");
        })
    }

    fn try_allocate(&self, size: usize) -> Result<Addr, TmError> {
        if size > MAX_SEGMENT_BYTES {
            return Err(TmError::OutOfMemory);
        }
        let bytes = Segment::footprint(size, self.align);
        self.budget.charge(bytes)?;

        let slot = match self.table.reserve() {
            Ok(slot) => slot,
            Err(err) => {
                self.budget.release(bytes);
                return Err(err);
            }
        };
        match Segment::try_new(slot, size, self.align) {
            Ok(segment) => {
                self.table.publish(segment);
                Ok(Addr::new(slot, 0))
            }
            Err(err) => {
                self.table.recycle(slot);
                self.budget.release(bytes);
                Err(err)
            }
        }
    }

    /// Unlink the segment in `slot` and hand it to the collector.
    ///
    /// For segments nobody else can have resolved: allocations of an
    /// aborted transaction.
    pub(crate) fn retire_slot(&self, slot: u32, guard: &Guard<'_>) {
        let segment = self.table.unlink(slot, guard);
        self.retire(slot, segment, false);
    }

    /// Retire the segment a committed free marked, leaving it resolvable for
    /// read-only transactions of the current cohorts.
    pub(crate) fn retire_freed(&self, slot: u32, guard: &Guard<'_>) {
        let segment = self.table.mark_retired(slot, guard);
        self.retire(slot, segment, true);
    }

    fn retire(&self, slot: u32, segment: *mut Segment, linked: bool) {
        let Some(segment) = NonNull::new(segment) else {
            return;
        };
        // SAFETY: still alive, the caller holds a guard.
        let size = unsafe { segment.as_ref() }.size();
        self.collector.retire(RetiredSegment {
            slot,
            bytes: Segment::footprint(size, self.align),
            segment,
            linked,
        });
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let stats = self.stats();
        debug!(
            commits = stats.commits,
            aborts = stats.aborts,
            live_segments = stats.live_segments,
            pending = stats.pending_reclamation,
            "region dropped"
        );
    }
}

impl core::fmt::Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("size", &self.size)
            .field("align", &self.align)
            .field("admission", &self.gate.policy())
            .field("segments", &self.table.occupied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_bad_layout() {
        assert_eq!(
            Region::create(64, 12).unwrap_err(),
            TmError::InvalidLayout { size: 64, align: 12 }
        );
        assert!(Region::create(0, 8).is_err());
        assert!(Region::create(60, 8).is_err());
    }

    #[test]
    fn test_accessors() {
        let region = Region::create(96, 32).unwrap();
        assert_eq!(region.size(), 96);
        assert_eq!(region.align(), 32);
        assert_eq!(region.start().slot(), Some(PERMANENT_SLOT));
        assert_eq!(region.admission(), Admission::Optimistic);
        assert_eq!(region.stats().live_segments, 1);
    }

    #[test]
    fn test_small_align_is_raised() {
        let region = Region::create(12, 4).unwrap();
        assert_eq!(region.align(), crate::MIN_ALIGN);
        assert_eq!(region.size(), 12);

        // The rounded-up permanent segment is fully addressable.
        let mut tx = region.begin(true).unwrap();
        let mut buf = [0xAAu8; 16];
        tx.read(region.start(), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_create_over_limit_is_oom() {
        let config = RegionConfig::new(1024, 8).memory_limit(64);
        assert_eq!(Region::with_config(config).unwrap_err(), TmError::OutOfMemory);
    }

    #[test]
    fn test_budget_tracks_segments() {
        let region = Region::create(64, 8).unwrap();
        let base = region.stats().bytes_in_use;
        assert_eq!(base, Segment::footprint(64, 8));

        let mut tx = region.begin(false).unwrap();
        tx.alloc(128).unwrap();
        assert!(tx.end());
        assert_eq!(
            region.stats().bytes_in_use,
            base + Segment::footprint(128, 8)
        );
    }

    #[test]
    fn test_retired_segments_are_reclaimed() {
        let region = Region::create(64, 8).unwrap();
        let base = region.stats().bytes_in_use;

        let mut tx = region.begin(false).unwrap();
        let seg = tx.alloc(64).unwrap();
        assert!(tx.end());

        let mut tx = region.begin(false).unwrap();
        tx.free(seg).unwrap();
        assert!(tx.end());

        // Nobody is pinned: a few passes drain the cohorts.
        for _ in 0..8 {
            region.collect();
        }
        let stats = region.stats();
        assert_eq!(stats.pending_reclamation, 0);
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.live_segments, 1);
        assert_eq!(stats.bytes_in_use, base);

        // The slot index is reused.
        let mut tx = region.begin(false).unwrap();
        assert_eq!(tx.alloc(64).unwrap(), seg);
        assert!(tx.end());
    }
}
