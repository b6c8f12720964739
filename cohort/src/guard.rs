//! Guard for cohort membership.
//!
//! A participant is admitted into the cohort of the current global epoch when
//! it pins, and stays a member until its [`Guard`] is dropped. Unlike a
//! thread-local pin, a guard is not tied to the thread that created it: it can
//! be stored in a longer-lived record (such as a transaction) and released from
//! another thread.

use crate::epoch::EpochState;

/// RAII guard representing membership in one cohort.
///
/// While a Guard exists, nothing retired at or after the guard's epoch is
/// released, so every [`Shared`](crate::Shared) pointer loaded under it stays
/// valid. Dropping the guard leaves the cohort and tries to advance the global
/// epoch.
pub struct Guard<'c> {
    state: &'c EpochState,
    epoch: u64,
}

impl<'c> Guard<'c> {
    #[inline]
    pub(crate) fn enter(state: &'c EpochState) -> Self {
        let epoch = state.enter();
        Self { state, epoch }
    }

    /// The epoch this guard was admitted in.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for Guard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.state.leave(self.epoch);
        // Opportunistic: the last member of the old cohort moves the epoch along.
        self.state.try_advance();
    }
}

impl core::fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Guard").field("epoch", &self.epoch).finish()
    }
}
