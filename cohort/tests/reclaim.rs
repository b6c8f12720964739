use cohort::{Atomic, Collector, Shared};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

struct CountedNode {
    value: usize,
    drop_count: Arc<AtomicUsize>,
}

impl Drop for CountedNode {
    fn drop(&mut self) {
        self.drop_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_retire_eventually_frees() {
    let drops = Arc::new(AtomicUsize::new(0));
    let collector: Arc<Collector<Box<CountedNode>>> = Arc::new(Collector::new());

    let mut handles = vec![];
    for t in 0..4 {
        let d = drops.clone();
        let collector = collector.clone();
        handles.push(thread::spawn(move || {
            for i in 0..256 {
                let _guard = collector.pin();
                collector.retire(Box::new(CountedNode {
                    value: t * 1000 + i,
                    drop_count: d.clone(),
                }));
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Every participant is gone: two advances expire everything.
    collector.try_advance();
    collector.try_advance();
    let released = collector.reclaim(drop);

    assert_eq!(released, 4 * 256);
    assert_eq!(drops.load(Ordering::SeqCst), 4 * 256);
    assert_eq!(collector.pending(), 0);
}

#[test]
fn test_guard_protects_from_reclamation() {
    let drops = Arc::new(AtomicUsize::new(0));
    let collector: Collector<Box<CountedNode>> = Collector::new();
    let atomic = Atomic::new(Box::into_raw(Box::new(CountedNode {
        value: 42,
        drop_count: drops.clone(),
    })));

    let guard = collector.pin();
    let ptr = atomic.load(Ordering::Acquire, &guard);

    {
        // A later participant unlinks and retires the node.
        let other = collector.pin();
        let old = atomic.swap(Shared::null(), Ordering::AcqRel, &other);
        collector.retire(unsafe { Box::from_raw(old.as_raw()) });
    }

    for _ in 0..16 {
        collector.try_advance();
        collector.reclaim(drop);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(unsafe { ptr.as_ref() }.map(|n| n.value), Some(42));

    drop(guard);
    collector.try_advance();
    collector.try_advance();
    collector.reclaim(drop);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_swap_and_read() {
    const SLOTS: usize = 16;

    let drops = Arc::new(AtomicUsize::new(0));
    let collector: Arc<Collector<Box<CountedNode>>> = Arc::new(Collector::new());
    let slots: Arc<Vec<Atomic<CountedNode>>> = Arc::new(
        (0..SLOTS)
            .map(|i| {
                Atomic::new(Box::into_raw(Box::new(CountedNode {
                    value: i,
                    drop_count: drops.clone(),
                })))
            })
            .collect(),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = vec![];
    for _ in 0..3 {
        let collector = collector.clone();
        let slots = slots.clone();
        let stop = stop.clone();
        readers.push(thread::spawn(move || {
            let mut rng = rand::rng();
            let mut reads = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let guard = collector.pin();
                let ptr = slots[rng.random_range(0..SLOTS)].load(Ordering::Acquire, &guard);
                // A released node would have been overwritten; value stays in range.
                let node = unsafe { ptr.as_ref() }.expect("slots are never null");
                assert!(node.value < SLOTS * 10_000);
                reads += 1;
            }
            reads
        }));
    }

    let writer = {
        let collector = collector.clone();
        let slots = slots.clone();
        let drops = drops.clone();
        thread::spawn(move || {
            let mut rng = rand::rng();
            for round in 0..2_000 {
                let guard = collector.pin();
                let index = rng.random_range(0..SLOTS);
                let fresh = Box::into_raw(Box::new(CountedNode {
                    value: index + SLOTS * (round % 10_000),
                    drop_count: drops.clone(),
                }));
                let old = slots[index].swap(Shared::from_raw(fresh), Ordering::AcqRel, &guard).as_raw();
                drop(guard);
                collector.retire(unsafe { Box::from_raw(old) });
                collector.reclaim(drop);
            }
        })
    };

    writer.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    let total_reads: usize = readers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total_reads > 0);

    collector.try_advance();
    collector.try_advance();
    collector.reclaim(drop);
    assert_eq!(drops.load(Ordering::SeqCst), 2_000);

    let mut slots = Arc::try_unwrap(slots).ok().expect("all threads joined");
    for slot in slots.iter_mut() {
        unsafe { drop(Box::from_raw(slot.get_mut())) };
    }
}
