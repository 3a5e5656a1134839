//! The split-ordered hash map.
//!
//! Buckets are lazily materialized sentinels inside one global sorted
//! list; the bucket array is only an index of shortcuts into that list.
//! Growing the map doubles the array and copies the old shortcuts; no
//! entry is ever rehashed or moved, because a bucket's range under the new
//! capacity is a refinement of its range under the old one.

use crate::list::{self, Node};
use crate::order::{bucket_of, dummy_so_key, parent_of, regular_so_key};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use petek::{Atomic, Domain, Guard, Handle, RegisterError, Shared};

/// Initial bucket-array capacity (power of two).
const INITIAL_CAPACITY: usize = 16;

/// Resize threshold, in percent: grow once `count * 100 >= capacity * 75`.
const LOAD_FACTOR: usize = 75;

/// The bucket index: each slot is null (bucket not yet materialized) or a
/// shortcut to that bucket's sentinel in the global list. Capacity is the
/// slice length, so one atomic load of the array yields a consistent
/// (shortcuts, capacity) pair.
struct BucketArray<V> {
    slots: Box<[AtomicPtr<Node<V>>]>,
}

impl<V> BucketArray<V> {
    fn new(capacity: usize, head: *mut Node<V>) -> Box<Self> {
        let mut slots = Vec::with_capacity(capacity);
        // Bucket 0 enters the list at the head sentinel.
        slots.push(AtomicPtr::new(head));
        for _ in 1..capacity {
            slots.push(AtomicPtr::new(ptr::null_mut()));
        }
        Box::new(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// A double-capacity copy. New buckets' ranges are subsets of old
    /// ones, so carrying the old shortcuts over keeps them all valid.
    fn grow(&self) -> Box<Self> {
        let capacity = self.capacity() * 2;
        let mut slots = Vec::with_capacity(capacity);
        for slot in self.slots.iter() {
            slots.push(AtomicPtr::new(slot.load(Ordering::Acquire)));
        }
        for _ in self.capacity()..capacity {
            slots.push(AtomicPtr::new(ptr::null_mut()));
        }
        Box::new(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// A lock-free map from non-zero `u64` keys to caller-owned value handles.
///
/// The map stores `NonNull<V>` pointers and never dereferences or frees
/// them; value lifetime is entirely the caller's concern. Key `0` is
/// reserved for internal sentinels and is rejected by every operation.
///
/// Threads call [`register`](SplitOrderedMap::register) before operating;
/// the returned [`MapHandle`] carries the thread's reclamation slot.
pub struct SplitOrderedMap<V> {
    domain: Domain,
    head: *mut Node<V>,
    buckets: Atomic<BucketArray<V>>,
    count: AtomicUsize,
}

// SAFETY: all shared mutation goes through atomics; values are opaque
// pointers that cross threads, hence the V: Send + Sync requirement.
unsafe impl<V: Send + Sync> Send for SplitOrderedMap<V> {}
unsafe impl<V: Send + Sync> Sync for SplitOrderedMap<V> {}

impl<V: 'static> SplitOrderedMap<V> {
    /// Creates an empty map with capacity 16.
    pub fn new() -> Self {
        let head = Box::into_raw(Box::new(Node::sentinel(0)));
        let buckets = BucketArray::new(INITIAL_CAPACITY, head);
        Self {
            domain: Domain::new(),
            head,
            buckets: Atomic::new(Box::into_raw(buckets)),
            count: AtomicUsize::new(0),
        }
    }

    /// Registers the calling thread with the map's reclamation domain.
    ///
    /// Fails with [`RegisterError::SlotsExhausted`] when more than the
    /// compile-time thread limit are registered at once.
    pub fn register(&self) -> Result<MapHandle<'_, V>, RegisterError> {
        Ok(MapHandle {
            map: self,
            handle: self.domain.register()?,
        })
    }

    /// Number of live entries. A relaxed snapshot: exact once the map is
    /// quiescent, best-effort under concurrency.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Whether the map holds no entries (same caveat as [`len`](Self::len)).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sentinel the bucket for `key` enters the list at, materializing
    /// it (and transitively its parents) if necessary.
    fn bucket_head<'g>(&'g self, key: u64, guard: &'g Guard<'_>) -> &'g Node<V> {
        let buckets = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
        let bucket = bucket_of(key, buckets.capacity());
        self.ensure_bucket(buckets, bucket, guard)
    }

    fn ensure_bucket<'g>(
        &'g self,
        buckets: &'g BucketArray<V>,
        bucket: usize,
        guard: &'g Guard<'_>,
    ) -> &'g Node<V> {
        let slot = &buckets.slots[bucket];
        let installed = slot.load(Ordering::Acquire);
        if !installed.is_null() {
            // SAFETY: sentinels are never unlinked while the map is alive.
            return unsafe { &*installed };
        }

        // Slot 0 is installed at construction and carried by every resize
        // copy, so an empty slot always has a smaller parent to recurse to.
        // Depth is bounded by log2(capacity).
        let parent = self.ensure_bucket(buckets, parent_of(bucket), guard);
        let sentinel = self.insert_sentinel(parent, dummy_so_key(bucket), guard);

        // Losing this race is benign: sentinel insertion is idempotent, so
        // the winner installed the same node.
        let sentinel_ptr = sentinel as *const Node<V> as *mut Node<V>;
        let _ = slot.compare_exchange(
            ptr::null_mut(),
            sentinel_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        sentinel
    }

    /// Inserts the sentinel with `so_key` after `head`, or returns the
    /// existing one.
    fn insert_sentinel<'g>(
        &self,
        head: &'g Node<V>,
        so_key: u64,
        guard: &'g Guard<'_>,
    ) -> &'g Node<V> {
        let mut spare: Option<Box<Node<V>>> = None;
        loop {
            let (found, cursor) = list::find(head, so_key, 0, guard);
            if found {
                // SAFETY: found nodes are protected by the guard.
                return unsafe { cursor.curr.deref() };
            }
            let node = spare
                .take()
                .unwrap_or_else(|| Box::new(Node::sentinel(so_key)));
            node.next.store(cursor.curr, Ordering::Relaxed);
            let node_ptr = Box::into_raw(node);
            match cursor.prev.compare_exchange(
                cursor.curr,
                unsafe { Shared::from_raw(node_ptr) },
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => return unsafe { &*node_ptr },
                Err(_) => spare = Some(unsafe { Box::from_raw(node_ptr) }),
            }
        }
    }

    /// Doubles the bucket array once the load factor is exceeded. The old
    /// array is retired through the reclamation domain; racing traversals
    /// may still be reading it.
    fn maybe_resize(&self, guard: &Guard<'_>) {
        let count = self.count.load(Ordering::Relaxed);
        let current = self.buckets.load(Ordering::Acquire, guard);
        let current_ref = unsafe { current.deref() };
        if count * 100 < current_ref.capacity() * LOAD_FACTOR {
            return;
        }

        let grown = Box::into_raw(current_ref.grow());
        match self.buckets.compare_exchange(
            current,
            unsafe { Shared::from_raw(grown) },
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            // SAFETY: the old array just became unreachable from the map.
            Ok(_) => unsafe { guard.retire(current.as_raw()) },
            // Another thread grew the map first.
            Err(_) => drop(unsafe { Box::from_raw(grown) }),
        }
    }
}

impl<V: 'static> Default for SplitOrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for SplitOrderedMap<V> {
    /// Frees every node in the global list and the bucket array. `&mut
    /// self` rules out live operations; the embedded domain drops last and
    /// drains all retire queues (already-unlinked nodes, old arrays).
    fn drop(&mut self) {
        unsafe {
            let mut curr = self.head;
            while !curr.is_null() {
                let next = (*curr).next.load_unprotected(Ordering::Relaxed);
                drop(Box::from_raw(curr));
                curr = next.as_raw();
            }
            let buckets = self.buckets.load_unprotected(Ordering::Relaxed);
            drop(Box::from_raw(buckets.as_raw()));
        }
    }
}

/// A registered thread's view of a [`SplitOrderedMap`].
///
/// Owns one reclamation slot; dropping it unregisters. Not `Send`: each
/// thread registers for itself.
pub struct MapHandle<'m, V> {
    map: &'m SplitOrderedMap<V>,
    handle: Handle<'m>,
}

impl<'m, V: 'static> MapHandle<'m, V> {
    /// Inserts or updates `key`, returning the previous value handle.
    ///
    /// Returns `None` on fresh insertion, and also for the reserved key
    /// `0` (rejected without side effects). An update exchanges the value
    /// on the existing node atomically.
    pub fn insert(&self, key: u64, value: NonNull<V>) -> Option<NonNull<V>> {
        if key == 0 {
            return None;
        }
        let guard = self.handle.pin();
        let so_key = regular_so_key(key);
        let head = self.map.bucket_head(key, &guard);

        let mut spare: Option<Box<Node<V>>> = None;
        loop {
            let (found, cursor) = list::find(head, so_key, key, &guard);
            if found {
                // SAFETY: protected by the guard for the whole exchange.
                let node = unsafe { cursor.curr.deref() };
                let prior = node.value.swap(value.as_ptr(), Ordering::AcqRel);
                return NonNull::new(prior);
            }

            let node = spare
                .take()
                .unwrap_or_else(|| Box::new(Node::regular(key, so_key, value.as_ptr())));
            node.next.store(cursor.curr, Ordering::Relaxed);
            let node_ptr = Box::into_raw(node);
            match cursor.prev.compare_exchange(
                cursor.curr,
                unsafe { Shared::from_raw(node_ptr) },
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.map.count.fetch_add(1, Ordering::Relaxed);
                    self.map.maybe_resize(&guard);
                    return None;
                }
                Err(_) => spare = Some(unsafe { Box::from_raw(node_ptr) }),
            }
        }
    }

    /// Looks up `key`, returning the current value handle.
    pub fn get(&self, key: u64) -> Option<NonNull<V>> {
        if key == 0 {
            return None;
        }
        let guard = self.handle.pin();
        let so_key = regular_so_key(key);
        let head = self.map.bucket_head(key, &guard);

        let (found, cursor) = list::find(head, so_key, key, &guard);
        if !found {
            return None;
        }
        // SAFETY: protected by the guard.
        let node = unsafe { cursor.curr.deref() };
        NonNull::new(node.value.load(Ordering::Acquire))
    }

    /// Removes `key`, returning the prior value handle.
    ///
    /// The logical delete is the mark on the node's `next` pointer;
    /// whichever thread sets it owns the return value. Physical unlinking
    /// is best-effort here and completed by later traversals otherwise.
    pub fn remove(&self, key: u64) -> Option<NonNull<V>> {
        if key == 0 {
            return None;
        }
        let guard = self.handle.pin();
        let so_key = regular_so_key(key);
        let head = self.map.bucket_head(key, &guard);

        let (found, cursor) = list::find(head, so_key, key, &guard);
        if !found {
            return None;
        }
        // SAFETY: protected by the guard.
        let node = unsafe { cursor.curr.deref() };
        let value = node.value.load(Ordering::Acquire);

        let next = node.next.fetch_or(1, Ordering::AcqRel, &guard);
        if next.is_marked() {
            // A concurrent remove won the logical delete.
            return None;
        }

        if cursor
            .prev
            .compare_exchange(
                cursor.curr,
                next.with_mark(false),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            )
            .is_ok()
        {
            // SAFETY: the node just left the list.
            unsafe { guard.retire(cursor.curr.as_raw()) };
        }

        self.map.count.fetch_sub(1, Ordering::Relaxed);
        NonNull::new(value)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Current bucket-array capacity. Monotonically non-decreasing.
    pub fn capacity(&self) -> usize {
        let guard = self.handle.pin();
        let buckets = self.map.buckets.load(Ordering::Acquire, &guard);
        unsafe { buckets.deref() }.capacity()
    }

    /// Iterates over `(key, value)` pairs in split order.
    ///
    /// The iterator holds a critical section open and observes a racy
    /// snapshot: entries inserted or removed concurrently may or may not
    /// appear. Iteration order is an implementation detail.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            guard: self.handle.pin(),
            curr: self.map.head,
        }
    }
}

/// Iterator over a map's entries. See [`MapHandle::iter`].
pub struct Iter<'h, V> {
    guard: Guard<'h>,
    curr: *mut Node<V>,
}

impl<'h, V: 'static> Iterator for Iter<'h, V> {
    type Item = (u64, NonNull<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.curr.is_null() {
            // SAFETY: the guard held by the iterator protects the node.
            let node = unsafe { &*self.curr };
            let next = node.next.load(Ordering::Acquire, &self.guard);
            let item = if !node.is_sentinel() && !next.is_marked() {
                NonNull::new(node.value.load(Ordering::Acquire)).map(|value| (node.key, value))
            } else {
                None
            };
            self.curr = next.as_raw();
            if item.is_some() {
                return item;
            }
        }
        None
    }
}
