//! Region configuration.

use crate::addr::OFFSET_BITS;

/// Smallest word size. A word must be able to hold an [`Addr`](crate::Addr).
pub const MIN_ALIGN: usize = {
    let ptr = core::mem::size_of::<usize>();
    if ptr > 8 { ptr } else { 8 }
};

/// Segment slots per lazily allocated table chunk
pub const SLOT_CHUNK: usize = 1024;

/// Maximum number of segments (live or awaiting reclamation) per region
pub const MAX_SEGMENTS: usize = 1 << 22;

/// Largest segment an address can span
pub const MAX_SEGMENT_BYTES: usize = 1 << OFFSET_BITS;

/// How `begin` admits transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Admission {
    /// Every transaction is admitted immediately; conflicting read-write
    /// transactions are resolved by aborting the loser at access time.
    #[default]
    Optimistic,
    /// Shared/exclusive gate: read-only transactions share it, a read-write
    /// transaction holds it alone. `begin` blocks while the gate is taken.
    Exclusive,
}

/// Parameters of a shared memory region.
///
/// # Example
///
/// ```
/// use cohort_stm::{Admission, Region, RegionConfig};
///
/// let config = RegionConfig::new(4096, 8)
///     .admission(Admission::Exclusive)
///     .memory_limit(1 << 20);
/// let region = Region::with_config(config).unwrap();
/// assert_eq!(region.size(), 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) admission: Admission,
    pub(crate) memory_limit: Option<usize>,
}

impl RegionConfig {
    /// Configuration for a first segment of `size` bytes with `align`-byte words.
    pub fn new(size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            admission: Admission::default(),
            memory_limit: None,
        }
    }

    /// Select the admission policy.
    pub fn admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    /// Cap the bytes (payload copies plus word controls) the region may hold.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Requested first-segment size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Word size actually used: the requested alignment, raised to [`MIN_ALIGN`].
    pub fn effective_align(&self) -> usize {
        self.align.max(MIN_ALIGN)
    }

    /// Check the layout rules: power-of-two alignment, size a positive multiple of it.
    pub(crate) fn validate(&self) -> Result<(), crate::TmError> {
        let bad = || crate::TmError::InvalidLayout {
            size: self.size,
            align: self.align,
        };
        if !self.align.is_power_of_two() || self.size == 0 || self.size % self.align != 0 {
            return Err(bad());
        }
        if self.size > MAX_SEGMENT_BYTES {
            return Err(bad());
        }
        Ok(())
    }
}
