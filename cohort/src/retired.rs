//! Retired entries awaiting release.
//!
//! Each entry remembers the global epoch observed *after* its value was
//! unlinked. Any participant that could still hold a reference was admitted
//! in that epoch or earlier, so the entry becomes releasable once the global
//! epoch is at least two ahead of it.

/// Epoch distance after which a retired value is unobservable
pub(crate) const GRACE_EPOCHS: u64 = 2;

/// A value whose release is deferred until its cohort has drained
pub(crate) struct Retired<T> {
    /// Epoch observed at retirement
    pub(crate) epoch: u64,
    /// The owned value; dropped or handed back on release
    pub(crate) value: T,
}

impl<T> Retired<T> {
    #[inline]
    pub(crate) fn new(epoch: u64, value: T) -> Self {
        Self { epoch, value }
    }

    /// Whether no participant can still observe this value at `global_epoch`
    #[inline]
    pub(crate) fn is_expired(&self, global_epoch: u64) -> bool {
        self.epoch + GRACE_EPOCHS <= global_epoch
    }
}

/// Retirement list ordered by epoch (entries are pushed in non-decreasing order)
pub(crate) struct RetiredList<T> {
    entries: Vec<Retired<T>>,
}

impl<T> RetiredList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn push(&mut self, entry: Retired<T>) {
        debug_assert!(
            self.entries.last().is_none_or(|last| last.epoch <= entry.epoch),
            "cohort: retirement epochs went backwards"
        );
        self.entries.push(entry);
    }

    /// Split off every entry that has expired at `global_epoch`.
    ///
    /// Entries are sorted by epoch, so the expired ones form a prefix.
    pub(crate) fn take_expired(&mut self, global_epoch: u64) -> Vec<Retired<T>> {
        let cut = self
            .entries
            .partition_point(|entry| entry.is_expired(global_epoch));
        let rest = self.entries.split_off(cut);
        core::mem::replace(&mut self.entries, rest)
    }
}
