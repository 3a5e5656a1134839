//! Registration handles and critical-section guards.
//!
//! A [`Handle`] is one claimed slot in a domain's table; dropping it
//! drains the slot's retire queues and releases the slot. A [`Guard`] is
//! one critical section: while it lives, the slot's published epoch pins
//! the global epoch to within one step, which is what keeps every pointer
//! loaded through it alive.

use crate::domain::{Domain, EPOCHS, QUIESCENT};
use crate::retired::Retired;
use alloc::boxed::Box;
use core::cell::Cell;
use core::marker::PhantomData as marker;
use core::sync::atomic::Ordering;

/// A registered thread's claim on one domain slot.
///
/// Not `Send`: the slot's retire queues are owned by the registering
/// thread, and only that thread may push to or drain them.
pub struct Handle<'d> {
    pub(crate) domain: &'d Domain,
    pub(crate) index: usize,
    /// Number of live guards. Only the outermost pin publishes an epoch
    /// and only the outermost unpin publishes quiescence, so a nested
    /// guard cannot strip protection from an outer one.
    pub(crate) pin_count: Cell<usize>,
    pub(crate) _marker: marker<*mut ()>,
}

impl<'d> Handle<'d> {
    /// Enters a critical section.
    ///
    /// The outermost pin publishes the current global epoch as this slot's
    /// observed epoch, gives the global epoch a chance to advance, and
    /// opportunistically reclaims this slot's queue from two epochs back.
    /// Nested pins share the outer guard's protection.
    pub fn pin(&self) -> Guard<'_> {
        let count = self.pin_count.get();
        self.pin_count.set(count + 1);

        if count == 0 {
            let slot = self.domain.slot(self.index);

            // The SeqCst publish pairs with the fence in `try_advance`: a
            // concurrent advancer either sees this epoch or its CAS-ordered
            // load of the global epoch happens after ours.
            let global = self.domain.global_epoch();
            slot.epoch.store(global, Ordering::SeqCst);

            self.domain.try_advance(self.index);

            let global = self.domain.global_epoch();
            if global >= 2 {
                let index = ((global - 2) % EPOCHS as u64) as usize;
                // SAFETY: this thread owns the slot, and the queue holds
                // only records retired at least two epochs before `global`.
                unsafe { slot.retired[index].drain() };
            }
        }

        Guard {
            handle: self,
            _marker: marker,
        }
    }
}

impl Drop for Handle<'_> {
    /// Unregisters: drains all three of this slot's retire queues and
    /// releases the slot. This is the only point besides domain teardown
    /// where a slot's arrears are guaranteed to be freed.
    fn drop(&mut self) {
        let slot = self.domain.slot(self.index);
        for queue in slot.retired.iter() {
            // SAFETY: the registered thread is quiescent (no guard can
            // outlive its handle) and owns these queues.
            unsafe { queue.drain() };
        }
        slot.epoch.store(QUIESCENT, Ordering::Release);
        slot.active.store(false, Ordering::Release);
    }
}

/// An active critical section on one registered slot.
///
/// Pointers loaded from a shared structure while a guard is alive remain
/// valid until the guard is dropped. Not `Send` for the same reason as
/// [`Handle`].
pub struct Guard<'h> {
    pub(crate) handle: &'h Handle<'h>,
    pub(crate) _marker: marker<*mut ()>,
}

impl Guard<'_> {
    /// Hands an unlinked allocation to the domain for deferred freeing.
    ///
    /// The record lands on this slot's queue for the current epoch and is
    /// dropped (as a `Box<T>`) once the global epoch has advanced two
    /// steps past it.
    ///
    /// # Safety
    ///
    /// - `ptr` must have come from `Box::<T>::into_raw`.
    /// - `ptr` must be unreachable for threads that are not currently in a
    ///   critical section, i.e. already unlinked from the shared structure.
    /// - `ptr` must not be retired more than once, and the caller must not
    ///   use it after this call.
    pub unsafe fn retire<T: 'static>(&self, ptr: *mut T) {
        let record = Box::new(Retired {
            ptr: ptr as *mut u8,
            drop_fn: Retired::drop_box::<T>,
            next: core::ptr::null_mut(),
        });
        let domain = self.handle.domain;
        let queue = (domain.global_epoch() % EPOCHS as u64) as usize;
        domain.slot(self.handle.index).retired[queue].push(record);
    }
}

impl Drop for Guard<'_> {
    /// Exits the critical section. The outermost guard publishes the
    /// quiescent sentinel; nested guards only decrement the pin count.
    #[inline]
    fn drop(&mut self) {
        let count = self.handle.pin_count.get();
        self.handle.pin_count.set(count - 1);
        if count == 1 {
            let slot = self.handle.domain.slot(self.handle.index);
            slot.epoch.store(QUIESCENT, Ordering::Release);
        }
    }
}
