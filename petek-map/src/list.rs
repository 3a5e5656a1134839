//! Lock-free sorted-list primitives with marked-pointer deletion.
//!
//! All map entries live in one singly linked list sorted by split-order
//! key. Deletion is two-phase: a node is first marked (the low bit of its
//! `next` pointer), then physically unlinked by whichever traversal next
//! passes it. `find` performs that unlinking as a side effect, so the list
//! converges without any dedicated cleanup pass.

use core::sync::atomic::{AtomicPtr, Ordering};
use petek::{Atomic, Guard, Shared};

/// One list entry: bucket sentinel or regular key/value node.
///
/// Sentinels have an even `so_key` (bit-reversed bucket index), key 0, and
/// a null value; regular nodes have an odd `so_key` (bit-reversed hash)
/// and a non-null, atomically replaceable value.
pub(crate) struct Node<V> {
    pub(crate) so_key: u64,
    pub(crate) key: u64,
    pub(crate) value: AtomicPtr<V>,
    pub(crate) next: Atomic<Node<V>>,
}

impl<V> Node<V> {
    pub(crate) fn regular(key: u64, so_key: u64, value: *mut V) -> Self {
        Self {
            so_key,
            key,
            value: AtomicPtr::new(value),
            next: Atomic::null(),
        }
    }

    pub(crate) fn sentinel(so_key: u64) -> Self {
        Self {
            so_key,
            key: 0,
            value: AtomicPtr::new(core::ptr::null_mut()),
            next: Atomic::null(),
        }
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        self.so_key & 1 == 0
    }
}

/// A position in the list: `curr` is the first unmarked node at or past
/// the search position, `prev` the `next` field that points at it.
pub(crate) struct Cursor<'g, V> {
    pub(crate) prev: &'g Atomic<Node<V>>,
    pub(crate) curr: Shared<'g, Node<V>>,
}

/// Searches from `head` for the node with `so_key` and exact `key`.
///
/// Returns whether such a node exists, plus a cursor at it (when found) or
/// at the first node past every candidate (a valid insertion point).
/// Distinct keys may share a `so_key`, so the traversal keeps scanning
/// through the run of equal sort keys until the exact key matches.
/// Sentinel lookups pass `key = 0`, which can only match a sentinel
/// because key 0 is reserved.
///
/// Marked nodes encountered along the way are unlinked by CAS and retired
/// through `guard`; a lost unlink race restarts the traversal from `head`.
pub(crate) fn find<'g, V: 'static>(
    head: &'g Node<V>,
    so_key: u64,
    key: u64,
    guard: &'g Guard<'_>,
) -> (bool, Cursor<'g, V>) {
    loop {
        if let Ok(result) = find_inner(head, so_key, key, guard) {
            return result;
        }
    }
}

#[inline]
fn find_inner<'g, V: 'static>(
    head: &'g Node<V>,
    so_key: u64,
    key: u64,
    guard: &'g Guard<'_>,
) -> Result<(bool, Cursor<'g, V>), ()> {
    let mut cursor = Cursor {
        prev: &head.next,
        curr: head.next.load(Ordering::Acquire, guard),
    };

    loop {
        let curr_node = match unsafe { cursor.curr.as_ref() } {
            None => return Ok((false, cursor)),
            Some(node) => node,
        };

        let next = curr_node.next.load(Ordering::Acquire, guard);

        if next.is_marked() {
            // curr is logically deleted: unlink it before moving on.
            let succ = next.with_mark(false);
            match cursor
                .prev
                .compare_exchange(cursor.curr, succ, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => {
                    // SAFETY: the node just left the list and can only be
                    // reached by threads pinned in the current epoch.
                    unsafe { guard.retire(cursor.curr.as_raw()) };
                    cursor.curr = succ;
                }
                Err(_) => return Err(()),
            }
            continue;
        }

        if curr_node.so_key > so_key {
            return Ok((false, cursor));
        }
        if curr_node.so_key == so_key && curr_node.key == key {
            return Ok((true, cursor));
        }

        cursor.prev = &curr_node.next;
        cursor.curr = next;
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use petek::Domain;

    #[test]
    fn find_scans_past_equal_sort_keys() {
        // Two regular nodes sharing a so_key but with different keys must
        // both be reachable by exact-key search.
        let domain = Domain::new();
        let handle = domain.register().unwrap();
        let guard = handle.pin();

        let head = Node::<u64>::sentinel(0);
        let a = Box::into_raw(Box::new(Node::regular(10, 101, core::ptr::null_mut())));
        let b = Box::into_raw(Box::new(Node::regular(20, 101, core::ptr::null_mut())));
        unsafe {
            (*a).next.store(Shared::from_raw(b), Ordering::Relaxed);
            head.next.store(Shared::from_raw(a), Ordering::Relaxed);
        }

        let (found_a, _) = find(&head, 101, 10, &guard);
        let (found_b, _) = find(&head, 101, 20, &guard);
        let (found_c, cursor) = find(&head, 101, 30, &guard);
        assert!(found_a);
        assert!(found_b);
        assert!(!found_c);
        // The miss still yields a valid insertion point past the run.
        assert!(cursor.curr.is_null());

        drop(guard);
        unsafe {
            drop(Box::from_raw(a));
            drop(Box::from_raw(b));
        }
    }
}
