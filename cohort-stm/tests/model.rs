//! Single-threaded model check: a region of eight words against a plain
//! array, across random committed and abandoned transactions.

use cohort_stm::{Region, Transaction};
use proptest::prelude::*;

const WORDS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Read(usize),
    Write(usize, u64),
    /// Write a run of words in one call
    WriteRun(usize, Vec<u64>),
}

#[derive(Debug, Clone)]
struct Script {
    ops: Vec<Op>,
    commit: bool,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WORDS).prop_map(Op::Read),
        (0..WORDS, any::<u64>()).prop_map(|(w, v)| Op::Write(w, v)),
        (0..WORDS)
            .prop_flat_map(|w| (Just(w), prop::collection::vec(any::<u64>(), 1..=WORDS - w)))
            .prop_map(|(w, vs)| Op::WriteRun(w, vs)),
    ]
}

fn script() -> impl Strategy<Value = Script> {
    (prop::collection::vec(op(), 0..12), any::<bool>()).prop_map(|(ops, commit)| Script { ops, commit })
}

fn read_word(tx: &mut Transaction<'_>, region: &Region, word: usize) -> u64 {
    let mut buf = [0u8; 8];
    tx.read(region.start().byte_add(word * 8), &mut buf).unwrap();
    u64::from_ne_bytes(buf)
}

proptest! {
    #[test]
    fn region_matches_model(scripts in prop::collection::vec(script(), 1..16)) {
        let region = Region::create(WORDS * 8, 8).unwrap();
        let mut committed = [0u64; WORDS];

        for script in scripts {
            let mut pending = committed;
            let mut tx = region.begin(false).unwrap();
            for op in &script.ops {
                match op {
                    Op::Read(w) => {
                        prop_assert_eq!(read_word(&mut tx, &region, *w), pending[*w]);
                    }
                    Op::Write(w, v) => {
                        tx.write(&v.to_ne_bytes(), region.start().byte_add(w * 8)).unwrap();
                        pending[*w] = *v;
                    }
                    Op::WriteRun(w, vs) => {
                        let bytes: Vec<u8> = vs.iter().flat_map(|v| v.to_ne_bytes()).collect();
                        tx.write(&bytes, region.start().byte_add(w * 8)).unwrap();
                        pending[*w..*w + vs.len()].copy_from_slice(vs);
                    }
                }
            }
            if script.commit {
                prop_assert!(tx.end());
                committed = pending;
            } else {
                drop(tx);
            }

            let mut ro = region.begin(true).unwrap();
            for w in 0..WORDS {
                prop_assert_eq!(read_word(&mut ro, &region, w), committed[w]);
            }
            prop_assert!(ro.end());
        }
    }

    #[test]
    fn alloc_free_round_trips(sizes in prop::collection::vec(1usize..=16, 1..8), commit in any::<bool>()) {
        let region = Region::create(64, 8).unwrap();
        let before = region.stats();

        let mut tx = region.begin(false).unwrap();
        let mut segments = Vec::new();
        for (i, words) in sizes.iter().enumerate() {
            let seg = tx.alloc(words * 8).unwrap();
            tx.write(&(i as u64).to_ne_bytes(), seg.byte_add((words - 1) * 8)).unwrap();
            segments.push((seg, *words));
        }
        for (i, (seg, words)) in segments.iter().enumerate() {
            let mut buf = [0u8; 8];
            tx.read(seg.byte_add((words - 1) * 8), &mut buf).unwrap();
            prop_assert_eq!(u64::from_ne_bytes(buf), i as u64);
        }
        for (seg, _) in &segments {
            tx.free(*seg).unwrap();
        }
        if commit {
            prop_assert!(tx.end());
        } else {
            drop(tx);
        }

        for _ in 0..8 {
            region.collect();
        }
        let after = region.stats();
        prop_assert_eq!(after.live_segments, before.live_segments);
        prop_assert_eq!(after.bytes_in_use, before.bytes_in_use);
        prop_assert_eq!(after.pending_reclamation, 0);
    }
}
