//! Opaque shared-memory addresses.
//!
//! An [`Addr`] names a byte inside a segment without being a machine pointer:
//!
//! ```text
//!  63                 40 39                                0
//! +---------------------+-----------------------------------+
//! |   slot index + 1    |            byte offset            |
//! +---------------------+-----------------------------------+
//! ```
//!
//! The all-zero value is the null address. Offsets are plain byte counts, so
//! `start.byte_add(n)` addresses the `n`-th byte of the same segment, the way
//! pointer arithmetic would.

use core::fmt;

/// Bits reserved for the byte offset within a segment
pub(crate) const OFFSET_BITS: u32 = 40;

const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Largest slot index an address can encode
pub(crate) const MAX_SLOT: u64 = (u64::MAX >> OFFSET_BITS) - 1;

/// Address of a byte in a region's shared memory.
///
/// Fits in one word (every region word is at least 8 bytes), so addresses can
/// be stored inside shared memory and followed by later transactions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Addr(u64);

impl Addr {
    /// The null address; never names a segment.
    pub const NULL: Addr = Addr(0);

    #[inline]
    pub(crate) fn new(slot: u32, offset: u64) -> Self {
        debug_assert!(u64::from(slot) <= MAX_SLOT);
        debug_assert!(offset <= OFFSET_MASK);
        Addr(((u64::from(slot) + 1) << OFFSET_BITS) | offset)
    }

    /// Rebuild an address from its raw bits (e.g. read back from shared memory).
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Addr(bits)
    }

    /// The raw bits, suitable for storing in a word.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Whether this is the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `bytes` further into the same segment.
    #[inline]
    pub const fn byte_add(self, bytes: usize) -> Self {
        Addr(self.0.wrapping_add(bytes as u64))
    }

    /// Slot index of the segment, `None` for addresses without one.
    #[inline]
    pub(crate) fn slot(self) -> Option<u32> {
        match self.0 >> OFFSET_BITS {
            0 => None,
            tagged => u32::try_from(tagged - 1).ok(),
        }
    }

    /// Byte offset within the segment.
    #[inline]
    pub(crate) fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            Some(slot) => write!(f, "Addr({}:{:#x})", slot, self.offset()),
            None => write!(f, "Addr(null+{:#x})", self.offset()),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
