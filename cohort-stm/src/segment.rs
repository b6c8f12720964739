//! Segments: two physical copies plus one control per word.
//!
//! Copies are arrays of `AtomicU64` lanes; a word of `align` bytes spans
//! `align / 8` lanes. Lane accesses are `Relaxed`: ordering comes from the
//! word's control (release on commit, acquire on read).

use crate::control::{CopyId, WordControl};
use crate::errors::TmError;
use core::sync::atomic::{AtomicU64, Ordering};

const LANE: usize = core::mem::size_of::<u64>();

/// An allocation unit of the region.
pub(crate) struct Segment {
    /// Slot in the region's segment table
    slot: u32,
    /// Size in bytes (a multiple of the word size)
    size: usize,
    /// Lanes per word
    lanes: usize,
    /// Copy A and copy B
    copies: [Box<[AtomicU64]>; 2],
    /// One control per word
    controls: Box<[WordControl]>,
}

impl Segment {
    /// Bytes a segment of `size` bytes holds: both copies plus controls.
    pub(crate) fn footprint(size: usize, align: usize) -> usize {
        2 * size + (size / align) * core::mem::size_of::<WordControl>()
    }

    /// Allocate a zero-filled segment with every word untouched.
    ///
    /// Fails with `OutOfMemory` instead of aborting the process, releasing
    /// whatever was allocated on the way.
    pub(crate) fn try_new(slot: u32, size: usize, align: usize) -> Result<Box<Self>, TmError> {
        debug_assert!(align >= LANE && align.is_power_of_two());
        debug_assert!(size > 0 && size % align == 0);

        let words = size / align;
        let lanes = size / LANE;

        let copy_a = try_boxed_slice(lanes, || AtomicU64::new(0))?;
        let copy_b = try_boxed_slice(lanes, || AtomicU64::new(0))?;
        let controls = try_boxed_slice(words, WordControl::new)?;

        Ok(Box::new(Self {
            slot,
            size,
            lanes: align / LANE,
            copies: [copy_a, copy_b],
            controls,
        }))
    }

    #[inline]
    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn num_words(&self) -> usize {
        self.controls.len()
    }

    #[inline]
    pub(crate) fn control(&self, word: usize) -> &WordControl {
        &self.controls[word]
    }

    #[inline]
    fn lanes_of(&self, copy: CopyId, word: usize) -> &[AtomicU64] {
        let start = word * self.lanes;
        &self.copies[copy.index()][start..start + self.lanes]
    }

    /// Copy word `word` of `copy` into `dst` (exactly one word long).
    #[inline]
    pub(crate) fn load_word(&self, copy: CopyId, word: usize, dst: &mut [u8]) {
        for (lane, chunk) in self.lanes_of(copy, word).iter().zip(dst.chunks_exact_mut(LANE)) {
            chunk.copy_from_slice(&lane.load(Ordering::Relaxed).to_ne_bytes());
        }
    }

    /// Copy `src` (exactly one word long) into word `word` of `copy`.
    #[inline]
    pub(crate) fn store_word(&self, copy: CopyId, word: usize, src: &[u8]) {
        for (lane, chunk) in self.lanes_of(copy, word).iter().zip(src.chunks_exact(LANE)) {
            let mut bytes = [0u8; LANE];
            bytes.copy_from_slice(chunk);
            lane.store(u64::from_ne_bytes(bytes), Ordering::Relaxed);
        }
    }
}

fn try_boxed_slice<T>(len: usize, mut init: impl FnMut() -> T) -> Result<Box<[T]>, TmError> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| TmError::OutOfMemory)?;
    items.resize_with(len, &mut init);
    Ok(items.into_boxed_slice())
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("slot", &self.slot)
            .field("size", &self.size)
            .field("words", &self.num_words())
            .finish()
    }
}
