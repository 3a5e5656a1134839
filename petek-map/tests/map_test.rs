use core::ptr::NonNull;
use petek_map::{RegisterError, SplitOrderedMap};
use std::sync::Arc;
use std::thread;

/// Leaks a slab of distinct values and returns it with static lifetime,
/// so value handles can cross threads freely.
fn slab(len: usize) -> &'static [u64] {
    Vec::leak((0..len as u64).collect::<Vec<_>>())
}

#[test]
fn basic_put_get_update_remove() {
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();

    let v1 = 42u64;
    let v2 = 99u64;
    let v3 = 7u64;
    let v4 = 100u64;

    assert_eq!(handle.insert(1, NonNull::from(&v1)), None);
    assert_eq!(handle.insert(2, NonNull::from(&v2)), None);
    assert_eq!(handle.insert(3, NonNull::from(&v3)), None);
    assert_eq!(map.len(), 3);

    assert_eq!(handle.get(1), Some(NonNull::from(&v1)));
    assert_eq!(handle.get(2), Some(NonNull::from(&v2)));
    assert_eq!(handle.get(3), Some(NonNull::from(&v3)));
    assert_eq!(handle.get(4), None);

    // Update returns the prior handle and leaves the count alone.
    assert_eq!(handle.insert(2, NonNull::from(&v4)), Some(NonNull::from(&v2)));
    assert_eq!(handle.get(2), Some(NonNull::from(&v4)));
    assert_eq!(map.len(), 3);

    assert_eq!(handle.remove(1), Some(NonNull::from(&v1)));
    assert_eq!(handle.get(1), None);
    assert_eq!(map.len(), 2);

    assert_eq!(handle.remove(999), None);
    assert_eq!(map.len(), 2);
}

#[test]
fn reserved_key_is_rejected() {
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();

    let v = 1u64;
    assert_eq!(handle.insert(0, NonNull::from(&v)), None);
    assert_eq!(map.len(), 0);
    assert_eq!(handle.get(0), None);
    assert_eq!(handle.remove(0), None);
    assert!(!handle.contains_key(0));
}

#[test]
fn remove_absent_leaves_count() {
    let map = SplitOrderedMap::<u64>::new();
    let handle = map.register().unwrap();
    assert_eq!(handle.remove(17), None);
    assert_eq!(map.len(), 0);

    let v = 5u64;
    handle.insert(17, NonNull::from(&v));
    assert_eq!(handle.remove(18), None);
    assert_eq!(map.len(), 1);
    // Double remove: the second must miss.
    assert_eq!(handle.remove(17), Some(NonNull::from(&v)));
    assert_eq!(handle.remove(17), None);
    assert_eq!(map.len(), 0);
}

#[test]
fn contains_and_is_empty() {
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();
    assert!(map.is_empty());

    let v = 3u64;
    handle.insert(11, NonNull::from(&v));
    assert!(handle.contains_key(11));
    assert!(!handle.contains_key(12));
    assert!(!map.is_empty());
}

#[test]
fn register_per_thread_limit() {
    let map = SplitOrderedMap::<u64>::new();
    let handles: Vec<_> = (0..petek::MAX_THREADS)
        .map(|_| map.register().unwrap())
        .collect();
    assert!(matches!(
        map.register().map(|_| ()),
        Err(RegisterError::SlotsExhausted)
    ));
    drop(handles);
    assert!(map.register().is_ok());
}

#[test]
#[cfg_attr(miri, ignore)]
fn growth_to_ten_thousand_keys() {
    let values = slab(10_000);
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();

    let initial_capacity = handle.capacity();
    assert_eq!(initial_capacity, 16);

    for key in 1..=10_000u64 {
        assert_eq!(
            handle.insert(key, NonNull::from(&values[key as usize - 1])),
            None
        );
    }
    assert_eq!(map.len(), 10_000);
    for key in 1..=10_000u64 {
        assert_eq!(handle.get(key), Some(NonNull::from(&values[key as usize - 1])));
    }

    // 10 000 entries at a 75% load factor force the table past 16 384.
    assert!(handle.capacity() >= 16_384);

    for key in 1..=5_000u64 {
        assert_eq!(
            handle.remove(key),
            Some(NonNull::from(&values[key as usize - 1]))
        );
    }
    assert_eq!(map.len(), 5_000);
    for key in 1..=5_000u64 {
        assert_eq!(handle.get(key), None);
    }
    for key in 5_001..=10_000u64 {
        assert_eq!(handle.get(key), Some(NonNull::from(&values[key as usize - 1])));
    }
}

#[test]
fn capacity_never_shrinks() {
    let values = slab(2_000);
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();

    let mut last = handle.capacity();
    for key in 1..=2_000u64 {
        handle.insert(key, NonNull::from(&values[key as usize - 1]));
        let capacity = handle.capacity();
        assert!(capacity >= last);
        last = capacity;
    }
    // Removals must not shrink the table either.
    for key in 1..=2_000u64 {
        handle.remove(key);
        assert_eq!(handle.capacity(), last);
    }
}

#[test]
fn iter_sees_live_entries() {
    let values = slab(100);
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();

    for key in 1..=100u64 {
        handle.insert(key, NonNull::from(&values[key as usize - 1]));
    }
    for key in 1..=50u64 {
        handle.remove(key);
    }

    let mut seen: Vec<u64> = handle.iter().map(|(key, _)| key).collect();
    seen.sort_unstable();
    let expected: Vec<u64> = (51..=100).collect();
    assert_eq!(seen, expected);

    for (key, value) in handle.iter() {
        assert_eq!(value, NonNull::from(&values[key as usize - 1]));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn disjoint_ranges_across_eight_threads() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 10_000;

    let values = slab((THREADS * PER_THREAD) as usize);
    let map = Arc::new(SplitOrderedMap::new());

    let mut workers = vec![];
    for t in 0..THREADS {
        let map = map.clone();
        workers.push(thread::spawn(move || {
            let handle = map.register().unwrap();
            let range = (t * PER_THREAD + 1)..=(t * PER_THREAD + PER_THREAD);

            for key in range.clone() {
                let value = NonNull::from(&values[key as usize - 1]);
                assert_eq!(handle.insert(key, value), None);
            }
            for key in range.clone() {
                let value = NonNull::from(&values[key as usize - 1]);
                assert_eq!(handle.get(key), Some(value));
            }
            for key in range {
                let value = NonNull::from(&values[key as usize - 1]);
                assert_eq!(handle.remove(key), Some(value));
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(map.len(), 0);
    let handle = map.register().unwrap();
    for key in [1u64, 40_000, 80_000] {
        assert_eq!(handle.get(key), None);
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_updates_of_one_key() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 1_000;

    let values = slab(THREADS);
    let map = Arc::new(SplitOrderedMap::new());

    let mut workers = vec![];
    for t in 0..THREADS {
        let map = map.clone();
        workers.push(thread::spawn(move || {
            let handle = map.register().unwrap();
            for _ in 0..ROUNDS {
                handle.insert(1, NonNull::from(&values[t]));
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(map.len(), 1);
    let handle = map.register().unwrap();
    let value = handle.get(1).unwrap();
    assert!(values.iter().any(|v| NonNull::from(v) == value));
}

#[test]
#[cfg_attr(miri, ignore)]
fn mixed_operations_stress() {
    use rand::prelude::*;

    const THREADS: u64 = 4;
    const KEYS: u64 = 512;
    const OPS: usize = 20_000;

    let values = slab(KEYS as usize);
    let map = Arc::new(SplitOrderedMap::new());

    let mut workers = vec![];
    for _ in 0..THREADS {
        let map = map.clone();
        workers.push(thread::spawn(move || {
            let handle = map.register().unwrap();
            let mut rng = rand::thread_rng();
            for _ in 0..OPS {
                let key = rng.gen_range(1..=KEYS);
                let value = NonNull::from(&values[key as usize - 1]);
                match rng.gen_range(0..3) {
                    0 => {
                        handle.insert(key, value);
                    }
                    1 => {
                        // Any hit must map a key to its own slab slot.
                        if let Some(seen) = handle.get(key) {
                            assert_eq!(seen, value);
                        }
                    }
                    _ => {
                        handle.remove(key);
                    }
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // Every surviving entry is consistent and the count matches a fresh
    // sweep.
    let handle = map.register().unwrap();
    let mut live = 0;
    for key in 1..=KEYS {
        if let Some(seen) = handle.get(key) {
            assert_eq!(seen, NonNull::from(&values[key as usize - 1]));
            live += 1;
        }
    }
    assert_eq!(map.len(), live);
}

#[test]
fn drop_with_live_entries() {
    let values = slab(5_000);
    let map = SplitOrderedMap::new();
    let handle = map.register().unwrap();
    for key in 1..=5_000u64 {
        handle.insert(key, NonNull::from(&values[key as usize - 1]));
    }
    // Remove half so retired nodes sit in the queues at drop time.
    for key in 1..=2_500u64 {
        handle.remove(key);
    }
    drop(handle);
    drop(map);
}
