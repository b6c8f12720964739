//! Segment table: stable slot indices mapped to segments.
//!
//! Two levels: a fixed directory of lazily allocated chunks, each holding
//! [`SLOT_CHUNK`] atomic segment pointers. Slots never move, so lookups are
//! two acquire loads with no lock.
//!
//! A slot's tag tracks a free:
//!
//! - `FREEING`: a transaction freed the segment and has not ended yet; it
//!   either retires the slot (commit) or drops the mark again (abort)
//! - `RETIRED`: the free committed, but read-only transactions that began
//!   before it may still resolve the slot; the region unlinks it once their
//!   cohorts have drained

use crate::config::{MAX_SEGMENTS, SLOT_CHUNK};
use crate::errors::TmError;
use crate::segment::Segment;
use cohort::{Atomic, Guard, Shared};
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use parking_lot::Mutex;

const DIRECTORY: usize = MAX_SEGMENTS / SLOT_CHUNK;

/// Tag marking a slot whose segment is being freed
const FREEING: usize = 0b01;
/// Tag marking a slot whose free committed
const RETIRED: usize = 0b10;

const _: () = assert!(core::mem::align_of::<Segment>() > RETIRED);

struct Chunk {
    slots: [Atomic<Segment>; SLOT_CHUNK],
}

impl Chunk {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Atomic::null()),
        }
    }
}

/// Result of resolving a slot index.
pub(crate) enum Lookup<'g> {
    /// Linked and usable
    Live(Shared<'g, Segment>),
    /// Unlinked by an in-flight free
    Freeing(Shared<'g, Segment>),
    /// Freed by a committed transaction, not unlinked yet
    Retired(Shared<'g, Segment>),
    /// Never allocated, already freed, or out of range
    Vacant,
}

pub(crate) struct SegmentTable {
    directory: Box<[AtomicPtr<Chunk>]>,
    /// Next never-used slot index
    next: AtomicU32,
    /// Slots whose segments were reclaimed
    recycled: Mutex<Vec<u32>>,
    /// Slots currently holding a segment (linked or freeing)
    occupied: AtomicUsize,
}

impl SegmentTable {
    pub(crate) fn new() -> Self {
        Self {
            directory: (0..DIRECTORY)
                .map(|_| AtomicPtr::new(core::ptr::null_mut()))
                .collect(),
            next: AtomicU32::new(0),
            recycled: Mutex::new(Vec::new()),
            occupied: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    /// Slot `index`, or `None` when its chunk was never allocated.
    #[inline]
    fn slot(&self, index: u32) -> Option<&Atomic<Segment>> {
        let index = index as usize;
        let chunk = self.directory.get(index / SLOT_CHUNK)?.load(Ordering::Acquire);
        // SAFETY: chunks are published once and only freed in Drop.
        unsafe { chunk.as_ref() }.map(|chunk| &chunk.slots[index % SLOT_CHUNK])
    }

    /// Slot `index`, allocating its chunk on first use.
    fn slot_or_grow(&self, index: u32) -> &Atomic<Segment> {
        let index = index as usize;
        let entry = &self.directory[index / SLOT_CHUNK];
        let mut chunk = entry.load(Ordering::Acquire);
        if chunk.is_null() {
            let fresh = Box::into_raw(Box::new(Chunk::new()));
            match entry.compare_exchange(
                core::ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => chunk = fresh,
                Err(winner) => {
                    // SAFETY: `fresh` was never published.
                    unsafe { drop(Box::from_raw(fresh)) };
                    chunk = winner;
                }
            }
        }
        // SAFETY: non-null chunks stay alive until Drop.
        unsafe { &(*chunk).slots[index % SLOT_CHUNK] }
    }

    /// Reserve an empty slot index.
    pub(crate) fn reserve(&self) -> Result<u32, TmError> {
        if let Some(index) = self.recycled.lock().pop() {
            return Ok(index);
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        if index as usize >= MAX_SEGMENTS {
            // Undo so the counter cannot creep towards wraparound.
            self.next.fetch_sub(1, Ordering::Relaxed);
            return Err(TmError::OutOfMemory);
        }
        Ok(index)
    }

    /// Return a reserved slot index that ended up unused, or whose segment
    /// has been reclaimed.
    pub(crate) fn recycle(&self, index: u32) {
        self.recycled.lock().push(index);
    }

    /// Link `segment` into its reserved slot, returning the stable pointer.
    pub(crate) fn publish(&self, segment: Box<Segment>) -> *const Segment {
        let raw = Box::into_raw(segment);
        // SAFETY: just created from a Box
        let index = unsafe { (*raw).slot() };
        self.slot_or_grow(index)
            .store(Shared::from_raw(raw), Ordering::Release);
        self.occupied.fetch_add(1, Ordering::Relaxed);
        raw
    }

    /// Resolve `index` under `guard`.
    pub(crate) fn lookup<'g>(&self, index: u32, guard: &'g Guard<'_>) -> Lookup<'g> {
        let Some(slot) = self.slot(index) else {
            return Lookup::Vacant;
        };
        let shared = slot.load(Ordering::Acquire, guard);
        if shared.is_null() {
            Lookup::Vacant
        } else {
            match shared.tag() {
                FREEING => Lookup::Freeing(shared),
                RETIRED => Lookup::Retired(shared),
                _ => Lookup::Live(shared),
            }
        }
    }

    /// Mark `current` (a live segment) as being freed.
    ///
    /// Fails with the slot's new state when someone else changed it first.
    pub(crate) fn mark_freeing<'g>(
        &self,
        index: u32,
        current: Shared<'_, Segment>,
        guard: &'g Guard<'_>,
    ) -> Result<(), Lookup<'g>> {
        let Some(slot) = self.slot(index) else {
            return Err(Lookup::Vacant);
        };
        match slot.compare_exchange(
            current,
            current.with_tag(FREEING),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => Ok(()),
            Err(_) => Err(self.lookup(index, guard)),
        }
    }

    /// Undo `mark_freeing`: the segment is linked again.
    pub(crate) fn relink(&self, index: u32, guard: &Guard<'_>) {
        if let Some(slot) = self.slot(index) {
            let shared = slot.load(Ordering::Acquire, guard);
            debug_assert_eq!(shared.tag(), FREEING);
            slot.store(shared.with_tag(0), Ordering::Release);
        }
    }

    /// Turn a committed `FREEING` mark into `RETIRED`, returning the segment.
    ///
    /// The segment stops counting as occupied, but stays resolvable for
    /// read-only lookups until [`unlink`](Self::unlink).
    pub(crate) fn mark_retired(&self, index: u32, guard: &Guard<'_>) -> *mut Segment {
        let Some(slot) = self.slot(index) else {
            return core::ptr::null_mut();
        };
        let shared = slot.load(Ordering::Acquire, guard);
        debug_assert_eq!(shared.tag(), FREEING);
        // Only the freeing transaction touches a FREEING slot.
        slot.store(shared.with_tag(RETIRED), Ordering::Release);
        self.occupied.fetch_sub(1, Ordering::Relaxed);
        shared.as_raw()
    }

    /// Clear the slot and return the segment pointer it held.
    ///
    /// The slot index stays reserved until [`recycle`](Self::recycle).
    pub(crate) fn unlink(&self, index: u32, guard: &Guard<'_>) -> *mut Segment {
        let Some(slot) = self.slot(index) else {
            return core::ptr::null_mut();
        };
        let old = slot.swap(Shared::null(), Ordering::AcqRel, guard);
        if !old.is_null() && old.tag() != RETIRED {
            self.occupied.fetch_sub(1, Ordering::Relaxed);
        }
        old.as_raw()
    }
}

impl Drop for SegmentTable {
    fn drop(&mut self) {
        for entry in self.directory.iter_mut() {
            let chunk = *entry.get_mut();
            if chunk.is_null() {
                continue;
            }
            // SAFETY: exclusive access; every chunk came from Box::into_raw.
            let mut chunk = unsafe { Box::from_raw(chunk) };
            for slot in chunk.slots.iter_mut() {
                let segment = slot.get_mut();
                if !segment.is_null() {
                    // SAFETY: linked segments are owned by the table.
                    unsafe { drop(Box::from_raw(segment)) };
                }
            }
        }
    }
}
