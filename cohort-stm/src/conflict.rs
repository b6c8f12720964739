//! Word-level conflict detection.
//!
//! Every transactional access to a word goes through one of the functions
//! below. The rules, for a read-write transaction `T`:
//!
//! | control state                  | read by `T`             | write by `T`           |
//! |--------------------------------|-------------------------|------------------------|
//! | written, accessor = `T`        | scratch copy            | overwrite scratch      |
//! | written, accessor = `U`        | conflict                | conflict               |
//! | not written, accessor = none   | valid copy, claim for T | write scratch, claim   |
//! | not written, accessor = `T`    | valid copy              | write scratch          |
//! | not written, accessor = `U`    | valid copy              | conflict               |
//!
//! A read-only transaction always reads the valid copy and never conflicts.
//!
//! The single accessor slot stands in for a read set: a word read by `U` is
//! treated as a future conflict for any other writer until `U` ends.
//!
//! Words flip when their writer commits, so a read of a word someone else
//! holds is not protected by the slot: `U` may still write and commit it.
//! Such reads are reported as [`Access::Observed`] and re-checked with
//! [`still_valid`] before the reader commits.

use crate::control::Control;
use crate::segment::Segment;
use crate::transaction::TxId;
use core::sync::atomic::{Ordering, fence};

/// A word is owned by another transaction; the caller must abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Conflict;

/// How an access related to the word's accessor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Took the slot; must be logged so `end` can release it.
    Claimed,
    /// Already held the slot.
    Owned,
    /// Read the valid copy at `seq` while another transaction held the slot.
    Observed(u64),
}

/// Copy the valid copy of `word` into `dst`, starting from snapshot `seen`.
///
/// The copy is validated seqlock-style: if a commit flipped the word while we
/// were copying, the buffer may have been rewritten as scratch, so start over
/// from the new snapshot. Returns the snapshot the copy is consistent with.
#[inline]
fn load_valid(segment: &Segment, word: usize, mut seen: Control, dst: &mut [u8]) -> Control {
    let control = segment.control(word);
    loop {
        segment.load_word(seen.valid, word, dst);
        // Order the lane loads before the re-check.
        fence(Ordering::Acquire);
        let now = control.load(Ordering::Relaxed);
        if now.seq == seen.seq {
            return seen;
        }
        seen = control.load(Ordering::Acquire);
    }
}

/// Read `word` for a read-only transaction.
#[inline]
pub(crate) fn read_shared(segment: &Segment, word: usize, dst: &mut [u8]) {
    let seen = segment.control(word).load(Ordering::Acquire);
    load_valid(segment, word, seen, dst);
}

/// Read `word` for read-write transaction `tx`.
pub(crate) fn read_owned(
    segment: &Segment,
    word: usize,
    tx: TxId,
    dst: &mut [u8],
) -> Result<Access, Conflict> {
    let control = segment.control(word);
    let mut current = control.load(Ordering::Acquire);
    loop {
        if current.written {
            if current.is_owned_by(tx) {
                // Read back our own pending write.
                segment.load_word(current.scratch(), word, dst);
                return Ok(Access::Owned);
            }
            return Err(Conflict);
        }

        if current.accessor.is_none() {
            match control.compare_exchange(current, current.claimed_by(tx)) {
                Ok(_) => {
                    // We own the accessor slot now: nobody else can write the
                    // word, so the valid copy stays put while we read it.
                    segment.load_word(current.valid, word, dst);
                    return Ok(Access::Claimed);
                }
                Err(actual) => {
                    current = actual;
                    continue;
                }
            }
        }

        // Accessor is us (already logged) or another reader: valid copy.
        let seen = load_valid(segment, word, current, dst);
        if seen.is_owned_by(tx) {
            return Ok(Access::Owned);
        }
        if !seen.written {
            return Ok(Access::Observed(seen.seq));
        }
        // Raced with a writer claiming the word; re-evaluate against it.
        current = seen;
    }
}

/// Write `src` into `word` for read-write transaction `tx`.
pub(crate) fn write_owned(segment: &Segment, word: usize, tx: TxId, src: &[u8]) -> Result<Access, Conflict> {
    let control = segment.control(word);
    let mut current = control.load(Ordering::Acquire);
    loop {
        if current.written {
            if current.is_owned_by(tx) {
                // Repeated writes coalesce in the scratch copy.
                segment.store_word(current.scratch(), word, src);
                return Ok(Access::Owned);
            }
            return Err(Conflict);
        }

        let access = match current.accessor {
            None => Access::Claimed,
            Some(owner) if owner == tx => Access::Owned,
            // Read earlier by someone else: conservative conflict.
            Some(_) => return Err(Conflict),
        };

        match control.compare_exchange(current, current.written_by(tx)) {
            Ok(_) => {
                // Pairs with the fence in `load_valid`: a reader that sees any
                // of our lane stores also sees the flip that made this copy
                // scratch.
                fence(Ordering::Release);
                segment.store_word(current.scratch(), word, src);
                return Ok(access);
            }
            Err(actual) => current = actual,
        }
    }
}

/// Whether an observed read at `seq` still reflects the word for `tx`.
///
/// Fails once the word was flipped, or while another transaction has a
/// pending write to it. Checked after all of `tx`'s writes are in place, so
/// two transactions that each read what the other writes cannot both pass.
pub(crate) fn still_valid(segment: &Segment, word: usize, tx: TxId, seq: u64) -> bool {
    let now = segment.control(word).load(Ordering::Acquire);
    now.seq == seq && (!now.written || now.is_owned_by(tx))
}

/// Commit boundary for a word `tx` claimed: flip if written, then release.
pub(crate) fn commit_word(segment: &Segment, word: usize, tx: TxId) {
    let control = segment.control(word);
    let current = control.load(Ordering::Acquire);
    if !current.is_owned_by(tx) {
        // Duplicate log entry already handled.
        return;
    }
    let next = if current.written {
        current.committed()
    } else {
        current.released()
    };
    // Release: scratch lane stores become visible with the flip.
    control.store(next, Ordering::Release);
}

/// Abort boundary for a word `tx` claimed: abandon the scratch copy.
pub(crate) fn release_word(segment: &Segment, word: usize, tx: TxId) {
    let control = segment.control(word);
    let current = control.load(Ordering::Acquire);
    if current.is_owned_by(tx) {
        control.store(current.released(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CopyId;

    fn tx(n: u64) -> TxId {
        TxId::new(n).unwrap()
    }

    fn word(v: u64) -> [u8; 8] {
        v.to_ne_bytes()
    }

    fn seg() -> Box<Segment> {
        Segment::try_new(0, 64, 8).unwrap()
    }

    #[test]
    fn test_read_claims_untouched_word() {
        let s = seg();
        let mut out = [0u8; 8];
        assert_eq!(read_owned(&s, 0, tx(1), &mut out), Ok(Access::Claimed));
        assert!(s.control(0).load(Ordering::Acquire).is_owned_by(tx(1)));
        // Second read by the same transaction does not claim again.
        assert_eq!(read_owned(&s, 0, tx(1), &mut out), Ok(Access::Owned));
    }

    #[test]
    fn test_second_reader_does_not_claim() {
        let s = seg();
        let mut out = [0u8; 8];
        read_owned(&s, 0, tx(1), &mut out).unwrap();
        assert_eq!(read_owned(&s, 0, tx(2), &mut out), Ok(Access::Observed(0)));
        assert!(s.control(0).load(Ordering::Acquire).is_owned_by(tx(1)));
    }

    #[test]
    fn test_observed_read_invalidated_by_commit() {
        let s = seg();
        let mut out = [0u8; 8];
        read_owned(&s, 0, tx(1), &mut out).unwrap();
        let Ok(Access::Observed(seq)) = read_owned(&s, 0, tx(2), &mut out) else {
            panic!("expected an observed read");
        };
        assert!(still_valid(&s, 0, tx(2), seq));

        // The first accessor may still write; the observer must not commit.
        write_owned(&s, 0, tx(1), &word(1)).unwrap();
        assert!(!still_valid(&s, 0, tx(2), seq));
        commit_word(&s, 0, tx(1));
        assert!(!still_valid(&s, 0, tx(2), seq));
    }

    #[test]
    fn test_write_after_foreign_read_conflicts() {
        let s = seg();
        let mut out = [0u8; 8];
        read_owned(&s, 0, tx(5), &mut out).unwrap();
        assert_eq!(write_owned(&s, 0, tx(6), &word(1)), Err(Conflict));
    }

    #[test]
    fn test_write_after_own_read_upgrades() {
        let s = seg();
        let mut out = [0u8; 8];
        read_owned(&s, 3, tx(5), &mut out).unwrap();
        assert_eq!(write_owned(&s, 3, tx(5), &word(9)), Ok(Access::Owned));
        let ctl = s.control(3).load(Ordering::Acquire);
        assert!(ctl.written && ctl.is_owned_by(tx(5)));
    }

    #[test]
    fn test_self_visibility_and_isolation() {
        let s = seg();
        let mut out = [0u8; 8];
        assert_eq!(write_owned(&s, 0, tx(1), &word(0xFF)), Ok(Access::Claimed));

        read_owned(&s, 0, tx(1), &mut out).unwrap();
        assert_eq!(u64::from_ne_bytes(out), 0xFF);

        // Read-only readers keep seeing the committed value.
        read_shared(&s, 0, &mut out);
        assert_eq!(u64::from_ne_bytes(out), 0);

        // Other writers and readers conflict.
        assert_eq!(read_owned(&s, 0, tx(2), &mut out), Err(Conflict));
        assert_eq!(write_owned(&s, 0, tx(2), &word(1)), Err(Conflict));
    }

    #[test]
    fn test_commit_flips_valid_copy() {
        let s = seg();
        write_owned(&s, 1, tx(1), &word(7)).unwrap();
        write_owned(&s, 1, tx(1), &word(8)).unwrap();
        commit_word(&s, 1, tx(1));

        let ctl = s.control(1).load(Ordering::Acquire);
        assert_eq!(ctl.valid, CopyId::B);
        assert_eq!(ctl.accessor, None);
        assert!(!ctl.written);

        let mut out = [0u8; 8];
        read_shared(&s, 1, &mut out);
        assert_eq!(u64::from_ne_bytes(out), 8);

        // The next writer uses copy A as scratch.
        write_owned(&s, 1, tx(2), &word(9)).unwrap();
        read_shared(&s, 1, &mut out);
        assert_eq!(u64::from_ne_bytes(out), 8);
        commit_word(&s, 1, tx(2));
        read_shared(&s, 1, &mut out);
        assert_eq!(u64::from_ne_bytes(out), 9);
    }

    #[test]
    fn test_release_discards_write() {
        let s = seg();
        write_owned(&s, 2, tx(1), &word(42)).unwrap();
        release_word(&s, 2, tx(1));

        let ctl = s.control(2).load(Ordering::Acquire);
        assert_eq!(ctl, Control::UNTOUCHED);
        let mut out = [0u8; 8];
        read_shared(&s, 2, &mut out);
        assert_eq!(u64::from_ne_bytes(out), 0);
    }

    #[test]
    fn test_commit_of_foreign_word_is_ignored() {
        let s = seg();
        write_owned(&s, 0, tx(1), &word(3)).unwrap();
        commit_word(&s, 0, tx(2));
        release_word(&s, 0, tx(2));
        assert!(s.control(0).load(Ordering::Acquire).is_owned_by(tx(1)));
    }
}
