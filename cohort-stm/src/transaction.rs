//! Transactions: identity, access log, and the commit/abort boundary.
//!
//! A transaction owns no shared memory. It records the words it claimed (so
//! `end` can flip or release them) and the segments it allocated or freed (so
//! abort can undo them). Its cohort guard keeps every segment it resolved
//! alive until it ends.

use crate::addr::Addr;
use crate::admission::Ticket;
use crate::conflict::{self, Access, Conflict};
use crate::errors::TmError;
use crate::region::{PERMANENT_SLOT, Region};
use crate::segment::Segment;
use crate::table::Lookup;
use cohort::Guard;
use core::num::NonZeroU64;
use core::ptr::NonNull;
use tracing::{debug, trace};

/// Transaction identity.
///
/// Read-write transactions get a fresh id from the region's counter; every
/// read-only transaction shares [`TxId::READ_ONLY`], since they never claim
/// a word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxId(NonZeroU64);

impl TxId {
    /// Sentinel id shared by all read-only transactions.
    pub const READ_ONLY: TxId = TxId(NonZeroU64::MAX);

    /// `None` for 0, the encoding of "no accessor".
    #[inline]
    pub(crate) const fn new(raw: u64) -> Option<TxId> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(TxId(raw)),
            None => None,
        }
    }

    /// The raw id.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// Representation of a transaction on a [`Region`].
///
/// Ended with [`end`](Transaction::end); dropping a transaction that was
/// never ended aborts it.
pub struct Transaction<'r> {
    region: &'r Region,
    /// Cohort membership: segments resolved below stay alive while held.
    guard: Guard<'r>,
    id: TxId,
    read_only: bool,
    ticket: Option<Ticket>,
    /// Set by the first failing access; the transaction can only abort.
    doomed: bool,
    finished: bool,
    /// Words whose accessor slot this transaction took
    touched: Vec<(NonNull<Segment>, usize)>,
    /// Words read while another transaction held their slot, with the
    /// commit sequence seen
    observed: Vec<(NonNull<Segment>, usize, u64)>,
    /// Slots of segments allocated here
    allocated: Vec<u32>,
    /// Slots of segments this transaction marked as freeing
    freed: Vec<u32>,
}

// SAFETY: the segment pointers in `touched` and `observed` are only
// dereferenced while the guard is held, and segments are Sync. The guard
// itself is not tied to the creating thread.
unsafe impl Send for Transaction<'_> {}

impl<'r> Transaction<'r> {
    pub(crate) fn new(region: &'r Region, guard: Guard<'r>, id: TxId, read_only: bool, ticket: Ticket) -> Self {
        Self {
            region,
            guard,
            id,
            read_only,
            ticket: Some(ticket),
            doomed: false,
            finished: false,
            touched: Vec::new(),
            observed: Vec::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
        }
    }

    /// This transaction's id.
    #[inline]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Whether this transaction was begun read-only.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether an earlier access failed; `end` will report an abort.
    #[inline]
    pub fn is_doomed(&self) -> bool {
        self.doomed
    }

    /// Give up on this transaction: `end` will report an abort.
    ///
    /// Nothing is rolled back until the transaction ends or is dropped.
    pub fn abort(&mut self) {
        if !self.finished {
            self.doom(TmError::Doomed);
        }
    }

    /// Copy `dst.len()` bytes starting at `src` into `dst`.
    ///
    /// `src` must be word-aligned and the range must lie inside one segment.
    /// Words are read in ascending order; on a conflict the transaction is
    /// doomed and `dst` holds a partial copy that must not be used.
    pub fn read(&mut self, src: Addr, dst: &mut [u8]) -> Result<(), TmError> {
        self.ensure_live()?;
        let (segment, first) = self.resolve(src, dst.len()).map_err(|err| self.doom(err))?;
        // SAFETY: resolved under our guard, which is held until `self` drops.
        let seg = unsafe { segment.as_ref() };
        let align = self.region.align();

        if self.read_only {
            for (i, chunk) in dst.chunks_exact_mut(align).enumerate() {
                conflict::read_shared(seg, first + i, chunk);
            }
            return Ok(());
        }

        for (i, chunk) in dst.chunks_exact_mut(align).enumerate() {
            match conflict::read_owned(seg, first + i, self.id, chunk) {
                Ok(Access::Claimed) => self.touched.push((segment, first + i)),
                Ok(Access::Owned) => {}
                Ok(Access::Observed(seq)) => self.observed.push((segment, first + i, seq)),
                Err(Conflict) => {
                    return Err(self.doom(TmError::Conflict {
                        addr: src.byte_add(i * align),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Copy `src` into shared memory starting at `dst`.
    ///
    /// Writes land in the words' scratch copies and become visible to other
    /// transactions only when this one commits.
    pub fn write(&mut self, src: &[u8], dst: Addr) -> Result<(), TmError> {
        self.ensure_live()?;
        if self.read_only {
            return Err(self.doom(TmError::ReadOnly));
        }
        let (segment, first) = self.resolve(dst, src.len()).map_err(|err| self.doom(err))?;
        // SAFETY: resolved under our guard, which is held until `self` drops.
        let seg = unsafe { segment.as_ref() };
        let align = self.region.align();

        for (i, chunk) in src.chunks_exact(align).enumerate() {
            match conflict::write_owned(seg, first + i, self.id, chunk) {
                Ok(Access::Claimed) => self.touched.push((segment, first + i)),
                Ok(_) => {}
                Err(Conflict) => {
                    return Err(self.doom(TmError::Conflict {
                        addr: dst.byte_add(i * align),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Allocate a zero-filled segment of `size` bytes.
    ///
    /// [`TmError::OutOfMemory`] leaves the transaction live: the allocation
    /// simply did not happen. The segment is released again if the
    /// transaction aborts.
    pub fn alloc(&mut self, size: usize) -> Result<Addr, TmError> {
        self.ensure_live()?;
        if self.read_only {
            return Err(self.doom(TmError::ReadOnly));
        }
        let align = self.region.align();
        if size == 0 || size % align != 0 {
            return Err(self.doom(TmError::InvalidLayout { size, align }));
        }

        let addr = self.region.allocate_segment(size)?;
        if let Some(slot) = addr.slot() {
            self.allocated.push(slot);
        }
        Ok(addr)
    }

    /// Free the segment starting at `target`.
    ///
    /// The segment is unlinked at once, so nobody can reach it through the
    /// table, but it is only released after this transaction commits and the
    /// cohorts that could still hold it have drained. Abort relinks it.
    pub fn free(&mut self, target: Addr) -> Result<(), TmError> {
        self.ensure_live()?;
        if self.read_only {
            return Err(self.doom(TmError::ReadOnly));
        }
        let slot = match target.slot() {
            Some(slot) if slot != PERMANENT_SLOT && target.offset() == 0 => slot,
            _ => return Err(self.doom(TmError::InvalidAddress(target))),
        };

        let region = self.region;
        let table = &region.table;
        let mut state = table.lookup(slot, &self.guard);
        let outcome = loop {
            match state {
                Lookup::Live(current) => match table.mark_freeing(slot, current, &self.guard) {
                    Ok(()) => break Ok(()),
                    // Relinked or re-marked meanwhile; look again.
                    Err(now) => state = now,
                },
                Lookup::Freeing(_) if self.freed.contains(&slot) => {
                    break Err(TmError::InvalidAddress(target));
                }
                Lookup::Freeing(_) => break Err(TmError::Conflict { addr: target }),
                Lookup::Retired(_) | Lookup::Vacant => break Err(TmError::InvalidAddress(target)),
            }
        };

        match outcome {
            Ok(()) => {
                self.freed.push(slot);
                Ok(())
            }
            Err(err) => Err(self.doom(err)),
        }
    }

    /// End the transaction, returning whether it committed.
    ///
    /// A read-only transaction commits unless it was misused. A read-write
    /// transaction commits unless one of its accesses failed, or a word it
    /// read while another transaction held it has changed since.
    pub fn end(mut self) -> bool {
        let committed = self.finish(true);
        let region = self.region;
        // Leave the cohort before collecting, so our own epoch can drain.
        drop(self);
        region.collect();
        committed
    }

    #[inline]
    fn ensure_live(&self) -> Result<(), TmError> {
        if self.doomed {
            return Err(TmError::Doomed);
        }
        Ok(())
    }

    /// Mark the transaction doomed and pass `err` through.
    ///
    /// `OutOfMemory` never reaches here: it leaves the transaction live.
    fn doom(&mut self, err: TmError) -> TmError {
        debug_assert!(err.is_abort());
        if !self.doomed {
            self.doomed = true;
            debug!(tx = self.id.get(), cause = %err, "transaction doomed");
        }
        err
    }

    /// Resolve `addr` for an access of `len` bytes into (segment, first word).
    fn resolve(&self, addr: Addr, len: usize) -> Result<(NonNull<Segment>, usize), TmError> {
        let slot = addr.slot().ok_or(TmError::InvalidAddress(addr))?;
        let shared = match self.region.table.lookup(slot, &self.guard) {
            Lookup::Live(shared) => shared,
            // Freed, but not yet reclaimed: read-only readers never conflict.
            Lookup::Freeing(shared) | Lookup::Retired(shared) if self.read_only => shared,
            Lookup::Freeing(_) if self.freed.contains(&slot) => {
                return Err(TmError::InvalidAddress(addr));
            }
            Lookup::Freeing(_) => return Err(TmError::Conflict { addr }),
            Lookup::Retired(_) | Lookup::Vacant => return Err(TmError::InvalidAddress(addr)),
        };
        let segment = NonNull::new(shared.as_raw()).ok_or(TmError::InvalidAddress(addr))?;
        // SAFETY: loaded under our guard.
        let size = unsafe { segment.as_ref() }.size();

        let align = self.region.align();
        let offset = usize::try_from(addr.offset()).map_err(|_| TmError::Misaligned { addr, len })?;
        let in_bounds = offset.checked_add(len).is_some_and(|end| end <= size);
        if len == 0 || len % align != 0 || offset % align != 0 || !in_bounds {
            return Err(TmError::Misaligned { addr, len });
        }
        Ok((segment, offset / align))
    }

    /// Run the commit or abort boundary once. Returns whether it committed.
    fn finish(&mut self, commit: bool) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;

        let committed = commit && !self.doomed && self.validate();
        if committed {
            self.commit();
        } else {
            self.rollback();
        }

        if let Some(ticket) = self.ticket.take() {
            self.region.gate.leave(ticket);
        }
        self.region.counters.record(committed);
        committed
    }

    /// Re-check every observed read; our own writes are all in place.
    fn validate(&self) -> bool {
        let stale = self.observed.iter().position(|&(segment, word, seq)| {
            // SAFETY: logged under our guard, which is still held.
            !conflict::still_valid(unsafe { segment.as_ref() }, word, self.id, seq)
        });
        match stale {
            None => true,
            Some(index) => {
                debug!(tx = self.id.get(), index, "observed read changed before commit");
                false
            }
        }
    }

    fn commit(&mut self) {
        self.observed.clear();
        for (segment, word) in self.touched.drain(..) {
            // SAFETY: logged under our guard, which is still held.
            conflict::commit_word(unsafe { segment.as_ref() }, word, self.id);
        }
        for slot in self.freed.drain(..) {
            self.region.retire_freed(slot, &self.guard);
        }
        self.allocated.clear();

        if !self.read_only {
            trace!(tx = self.id.get(), "transaction committed");
        }
    }

    fn rollback(&mut self) {
        self.observed.clear();
        for (segment, word) in self.touched.drain(..) {
            // SAFETY: logged under our guard, which is still held.
            conflict::release_word(unsafe { segment.as_ref() }, word, self.id);
        }
        for slot in self.freed.drain(..) {
            self.region.table.relink(slot, &self.guard);
        }
        // Includes segments allocated and then freed here: relinked above,
        // unlinked for good now.
        for slot in self.allocated.drain(..) {
            self.region.retire_slot(slot, &self.guard);
        }

        debug!(tx = self.id.get(), "transaction aborted");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(false);
        }
    }
}

impl core::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("doomed", &self.doomed)
            .field("touched", &self.touched.len())
            .field("observed", &self.observed.len())
            .finish()
    }
}
