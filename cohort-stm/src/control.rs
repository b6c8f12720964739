//! Per-word control: which copy is valid, whether it is written, who touched it.
//!
//! The control is a DCAS-able pair packed into one 128-bit atomic:
//!
//! - low word: first accessor's transaction id (0 = untouched)
//! - high word: `commit_seq << 2 | is_written << 1 | valid_copy`
//!
//! `commit_seq` moves on every commit flip, which lets readers of the valid
//! copy detect that the buffer they were copying from changed roles under them.

use crate::transaction::TxId;
use core::sync::atomic::Ordering;
use portable_atomic::AtomicU128;

const VALID_BIT: u64 = 0b01;
const WRITTEN_BIT: u64 = 0b10;
const SEQ_SHIFT: u32 = 2;

/// One of a segment's two physical copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyId {
    A,
    B,
}

impl CopyId {
    /// The copy playing the opposite role.
    #[inline]
    pub(crate) fn other(self) -> Self {
        match self {
            CopyId::A => CopyId::B,
            CopyId::B => CopyId::A,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            CopyId::A => 0,
            CopyId::B => 1,
        }
    }
}

/// Decoded snapshot of a word control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Control {
    /// Authoritative copy for committed reads
    pub(crate) valid: CopyId,
    /// Whether `accessor` has a pending write in the scratch copy
    pub(crate) written: bool,
    /// First read-write transaction to touch the word since the last boundary
    pub(crate) accessor: Option<TxId>,
    /// Number of commit flips so far (wraps within 62 bits)
    pub(crate) seq: u64,
}

impl Control {
    /// Freshly created word: copy A valid, nobody touched it.
    pub(crate) const UNTOUCHED: Control = Control {
        valid: CopyId::A,
        written: false,
        accessor: None,
        seq: 0,
    };

    /// Copy that is not authoritative; only the writing accessor uses it.
    #[inline]
    pub(crate) fn scratch(self) -> CopyId {
        self.valid.other()
    }

    #[inline]
    pub(crate) fn is_owned_by(self, tx: TxId) -> bool {
        self.accessor == Some(tx)
    }

    /// `tx` becomes first accessor without writing.
    #[inline]
    pub(crate) fn claimed_by(self, tx: TxId) -> Self {
        Control {
            accessor: Some(tx),
            ..self
        }
    }

    /// `tx` owns the scratch copy.
    #[inline]
    pub(crate) fn written_by(self, tx: TxId) -> Self {
        Control {
            written: true,
            accessor: Some(tx),
            ..self
        }
    }

    /// Commit boundary of a written word: scratch becomes valid.
    #[inline]
    pub(crate) fn committed(self) -> Self {
        Control {
            valid: self.valid.other(),
            written: false,
            accessor: None,
            seq: self.seq.wrapping_add(1) & (u64::MAX >> SEQ_SHIFT),
        }
    }

    /// Boundary without a flip: pending write (if any) abandoned.
    #[inline]
    pub(crate) fn released(self) -> Self {
        Control {
            written: false,
            accessor: None,
            ..self
        }
    }

    #[inline]
    fn pack(self) -> u128 {
        let lo = self.accessor.map_or(0, TxId::get);
        let mut hi = self.seq << SEQ_SHIFT;
        if self.written {
            hi |= WRITTEN_BIT;
        }
        if self.valid == CopyId::B {
            hi |= VALID_BIT;
        }
        (lo as u128) | ((hi as u128) << 64)
    }

    #[inline]
    fn unpack(raw: u128) -> Self {
        let lo = raw as u64;
        let hi = (raw >> 64) as u64;
        Control {
            valid: if hi & VALID_BIT == 0 {
                CopyId::A
            } else {
                CopyId::B
            },
            written: hi & WRITTEN_BIT != 0,
            accessor: TxId::new(lo),
            seq: hi >> SEQ_SHIFT,
        }
    }
}

/// Atomic word control.
#[repr(align(16))]
pub(crate) struct WordControl {
    data: AtomicU128,
}

impl WordControl {
    pub(crate) fn new() -> Self {
        Self {
            data: AtomicU128::new(Control::UNTOUCHED.pack()),
        }
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> Control {
        Control::unpack(self.data.load(order))
    }

    /// Unconditional store.
    ///
    /// Only the control's current accessor may use this: no other transaction
    /// modifies a control whose accessor slot names someone else.
    #[inline]
    pub(crate) fn store(&self, new: Control, order: Ordering) {
        self.data.store(new.pack(), order);
    }

    /// Compare-exchange the whole control. On failure returns the actual value.
    #[inline]
    pub(crate) fn compare_exchange(&self, current: Control, new: Control) -> Result<Control, Control> {
        self.data
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(Control::unpack)
            .map_err(Control::unpack)
    }
}

impl Default for WordControl {
    fn default() -> Self {
        Self::new()
    }
}
