//! Admission: who may run concurrently, and under which identity.
//!
//! Read-only transactions are always admitted and share a sentinel id.
//! Read-write transactions draw a fresh id from a single monotonic counter;
//! the id space is a hard limit (ids are never reused, wraparound is not
//! handled). Under [`Admission::Exclusive`] a shared/exclusive gate is taken
//! as well.

use crate::config::Admission;
use crate::errors::TmError;
use crate::transaction::TxId;
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RawRwLock;
use parking_lot::lock_api::RawRwLock as _;

/// Mints read-write transaction ids: 1, 2, 3, ...
pub(crate) struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub(crate) const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// A never-before-issued id, or `IdsExhausted` once the space runs out.
    pub(crate) fn mint(&self) -> Result<TxId, TmError> {
        // Saturates at the read-only sentinel: no id is ever handed out twice.
        let raw = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(1).filter(|_| next < TxId::READ_ONLY.get())
            })
            .map_err(|_| TmError::IdsExhausted)?;
        TxId::new(raw).ok_or(TmError::IdsExhausted)
    }

    #[cfg(test)]
    fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }
}

/// Proof of admission, released when the transaction ends.
#[derive(Debug)]
#[must_use]
pub(crate) enum Ticket {
    /// Admitted without taking the gate
    Open,
    /// Holding the gate shared
    Shared,
    /// Holding the gate exclusively
    Exclusive,
}

/// The admission gate.
pub(crate) struct Gate {
    policy: Admission,
    lock: RawRwLock,
}

impl Gate {
    pub(crate) const fn new(policy: Admission) -> Self {
        Self {
            policy,
            lock: RawRwLock::INIT,
        }
    }

    #[inline]
    pub(crate) fn policy(&self) -> Admission {
        self.policy
    }

    /// Admit a transaction; may block under [`Admission::Exclusive`].
    pub(crate) fn enter(&self, read_only: bool) -> Ticket {
        match (self.policy, read_only) {
            (Admission::Optimistic, _) => Ticket::Open,
            (Admission::Exclusive, true) => {
                self.lock.lock_shared();
                Ticket::Shared
            }
            (Admission::Exclusive, false) => {
                self.lock.lock_exclusive();
                Ticket::Exclusive
            }
        }
    }

    /// Release what `enter` took.
    pub(crate) fn leave(&self, ticket: Ticket) {
        match ticket {
            Ticket::Open => {}
            // SAFETY: a Shared ticket is only created after lock_shared().
            Ticket::Shared => unsafe { self.lock.unlock_shared() },
            // SAFETY: an Exclusive ticket is only created after lock_exclusive().
            Ticket::Exclusive => unsafe { self.lock.unlock_exclusive() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdGenerator::new();
        let a = ids.mint().unwrap();
        let b = ids.mint().unwrap();
        assert!(b.get() > a.get());
        assert_eq!((a.get(), b.get()), (1, 2));
    }

    #[test]
    fn test_ids_exhaust_at_sentinel() {
        let ids = IdGenerator::starting_at(TxId::READ_ONLY.get() - 1);
        assert_eq!(ids.mint().map(TxId::get), Ok(TxId::READ_ONLY.get() - 1));
        assert_eq!(ids.mint(), Err(TmError::IdsExhausted));
        assert_eq!(ids.mint(), Err(TmError::IdsExhausted));
        assert_eq!(ids.next.load(Ordering::Relaxed), TxId::READ_ONLY.get());
    }

    #[test]
    fn test_exhausted_ids_stay_unique_across_threads() {
        let ids = Arc::new(IdGenerator::starting_at(TxId::READ_ONLY.get() - 64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || {
                    (0..64)
                        .filter_map(|_| ids.mint().ok().map(TxId::get))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut minted: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        minted.sort_unstable();
        let total = minted.len();
        minted.dedup();
        assert_eq!(minted.len(), total);
        assert_eq!(total, 64);
        assert!(minted.iter().all(|&id| id < TxId::READ_ONLY.get()));
    }

    #[test]
    fn test_optimistic_never_blocks() {
        let gate = Gate::new(Admission::Optimistic);
        let a = gate.enter(false);
        let b = gate.enter(false);
        gate.leave(a);
        gate.leave(b);
    }

    #[test]
    fn test_exclusive_gate_serializes_writers() {
        let gate = Arc::new(Gate::new(Admission::Exclusive));
        let readers = (gate.enter(true), gate.enter(true));

        let admitted = Arc::new(AtomicBool::new(false));
        let writer = {
            let gate = gate.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                let ticket = gate.enter(false);
                admitted.store(true, Ordering::SeqCst);
                gate.leave(ticket);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!admitted.load(Ordering::SeqCst), "writer admitted past readers");

        gate.leave(readers.0);
        gate.leave(readers.1);
        writer.join().unwrap();
        assert!(admitted.load(Ordering::SeqCst));
    }
}
