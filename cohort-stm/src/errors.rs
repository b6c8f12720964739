use crate::addr::Addr;
use thiserror::Error;

/// Errors reported by region and transaction operations.
///
/// Two families never overlap: [`TmError::OutOfMemory`] is a resource
/// failure that leaves the transaction usable, every other variant dooms it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TmError {
    /// Another transaction owns a word (or segment) this access needed.
    /// The transaction is doomed and must be ended.
    #[error("conflicting access at {addr}")]
    Conflict {
        /// Address of the first conflicting word.
        addr: Addr,
    },

    /// An operation was issued on a transaction that already aborted.
    #[error("transaction is doomed and must be ended")]
    Doomed,

    /// Allocation exhausted memory, the segment table or the configured limit.
    #[error("out of memory")]
    OutOfMemory,

    /// The address does not name a live segment of this region.
    #[error("invalid address {0}")]
    InvalidAddress(Addr),

    /// The access is not word-aligned or runs past its segment.
    #[error("misaligned access of {len} bytes at {addr}")]
    Misaligned {
        /// Start of the access.
        addr: Addr,
        /// Requested length in bytes.
        len: usize,
    },

    /// A size/alignment pair violates the region's layout rules.
    #[error("invalid layout: size {size} is not a positive multiple of alignment {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A mutating operation was issued on a read-only transaction.
    #[error("write, alloc or free issued on a read-only transaction")]
    ReadOnly,

    /// The read-write transaction id space is exhausted.
    #[error("transaction ids exhausted")]
    IdsExhausted,
}

impl TmError {
    /// Whether this error dooms the transaction that raised it.
    #[inline]
    pub fn is_abort(&self) -> bool {
        !matches!(self, TmError::OutOfMemory | TmError::IdsExhausted)
    }

    /// Whether retrying in a fresh transaction may succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TmError::Conflict { .. } | TmError::Doomed)
    }
}
