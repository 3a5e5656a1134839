//! Reclamation domain: global epoch, slot table, and the advance protocol.
//!
//! A [`Domain`] tracks a monotonically increasing global epoch and, per
//! registered thread, the last epoch that thread observed while inside a
//! critical section (or [`QUIESCENT`] when it is outside one). An
//! allocation retired in epoch `E` lands on the owning slot's queue
//! `E % 3` and is freed only once the global epoch has reached `E + 2`,
//! at which point no critical section can still reference it.

use crate::error::RegisterError;
use crate::guard::Handle;
use crate::retired::Retired;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData as marker;
use core::ptr;
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicU64, Ordering};

/// Number of epoch moduli (and retire queues per slot).
pub const EPOCHS: usize = 3;

// Maximum concurrently registered threads per domain. Configurable via
// cargo features:
//   petek = { features = ["max-threads-128"] }
// Default: 64.
#[cfg(feature = "max-threads-256")]
/// Maximum concurrently registered threads per domain.
pub const MAX_THREADS: usize = 256;
#[cfg(all(feature = "max-threads-128", not(feature = "max-threads-256")))]
/// Maximum concurrently registered threads per domain.
pub const MAX_THREADS: usize = 128;
#[cfg(not(any(feature = "max-threads-128", feature = "max-threads-256")))]
/// Maximum concurrently registered threads per domain.
pub const MAX_THREADS: usize = 64;

/// Slot epoch value meaning "not in a critical section": compares as
/// always ahead of the global epoch, so it never blocks advancement.
pub(crate) const QUIESCENT: u64 = u64::MAX;

/// One retire queue: a singly linked list of [`Retired`] records.
///
/// Only the slot's registered thread pushes to or drains this queue, so
/// relaxed operations suffice; the atomic exists because the slot table
/// itself is shared.
pub(crate) struct RetireQueue {
    head: AtomicPtr<Retired>,
}

impl RetireQueue {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Pushes a record. Owner thread only.
    pub(crate) fn push(&self, record: Box<Retired>) {
        let record = Box::into_raw(record);
        // SAFETY: the record was just allocated and is not yet shared.
        unsafe {
            (*record).next = self.head.load(Ordering::Relaxed);
        }
        self.head.store(record, Ordering::Relaxed);
    }

    /// Takes the whole queue and runs every record's destructor.
    ///
    /// # Safety
    ///
    /// The caller must either own the slot (registered thread) or hold
    /// exclusive access to the domain, and the queue's epoch must be at
    /// least two behind the global epoch (or the domain quiescent).
    pub(crate) unsafe fn drain(&self) {
        let mut curr = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        while !curr.is_null() {
            // SAFETY: records are pushed via Box::into_raw and popped once.
            let record = unsafe { Box::from_raw(curr) };
            unsafe { (record.drop_fn)(record.ptr) };
            curr = record.next;
        }
    }
}

/// Per-thread slot: activity flag, last observed epoch, and one retire
/// queue per epoch modulus. Cache-line aligned so that epoch publishes by
/// one thread do not false-share with its neighbors' scans.
#[repr(align(128))]
pub(crate) struct ThreadSlot {
    pub(crate) active: AtomicBool,
    pub(crate) epoch: AtomicU64,
    pub(crate) retired: [RetireQueue; EPOCHS],
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            epoch: AtomicU64::new(QUIESCENT),
            retired: [RetireQueue::new(), RetireQueue::new(), RetireQueue::new()],
        }
    }
}

/// An epoch-based reclamation domain.
///
/// Owns the global epoch counter and a fixed table of [`MAX_THREADS`]
/// thread slots. Domains are self-contained: a data structure embeds one
/// and its threads register against it, so slot lifetime is bounded by the
/// structure rather than the process.
pub struct Domain {
    epoch: AtomicU64,
    slots: Box<[ThreadSlot]>,
}

impl Domain {
    /// Creates a domain with epoch 0 and an empty slot table.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            slots.push(ThreadSlot::new());
        }
        Self {
            epoch: AtomicU64::new(0),
            slots: slots.into_boxed_slice(),
        }
    }

    /// Registers the calling thread: claims the first inactive slot and
    /// initializes its observed epoch to the current global epoch.
    ///
    /// The returned [`Handle`] unregisters (draining the slot's retire
    /// queues) on drop. Fails with [`RegisterError::SlotsExhausted`] when
    /// all [`MAX_THREADS`] slots are claimed.
    pub fn register(&self) -> Result<Handle<'_>, RegisterError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.epoch
                    .store(self.epoch.load(Ordering::Acquire), Ordering::SeqCst);
                return Ok(Handle {
                    domain: self,
                    index,
                    pin_count: core::cell::Cell::new(0),
                    _marker: marker,
                });
            }
        }
        Err(RegisterError::SlotsExhausted)
    }

    /// Current global epoch.
    #[inline]
    pub(crate) fn global_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &ThreadSlot {
        &self.slots[index]
    }

    /// Tries to bump the global epoch, then reclaims from the caller's own
    /// queue two epochs back.
    ///
    /// Advancement is gated on every active slot having observed the
    /// current epoch (or being quiescent). Only the caller's queues are
    /// ever drained here: other threads' arrears wait until those threads
    /// next enter a critical section or unregister.
    pub(crate) fn try_advance(&self, caller: usize) {
        let global = self.epoch.load(Ordering::Acquire);

        // Pairs with the SeqCst epoch publish in `Handle::pin`: after this
        // fence, any thread pinned before our epoch load is visible below.
        fence(Ordering::SeqCst);

        for slot in self.slots.iter() {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            let observed = slot.epoch.load(Ordering::Acquire);
            if observed != QUIESCENT && observed < global {
                return; // a pinned thread has not caught up yet
            }
        }

        if self
            .epoch
            .compare_exchange(global, global + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // New epoch is global + 1; the queue two behind it is now safe.
        if global >= 1 {
            let index = ((global - 1) % EPOCHS as u64) as usize;
            // SAFETY: caller owns the slot, and every record in this queue
            // was retired at least two epochs before the new global epoch.
            unsafe { self.slot(caller).retired[index].drain() };
        }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Domain {
    /// Drains every slot's retire queues. `&mut self` guarantees that no
    /// handle or guard is alive, so every pending record is reclaimable.
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            for queue in slot.retired.iter() {
                // SAFETY: exclusive access; the domain is quiescent.
                unsafe { queue.drain() };
            }
        }
    }
}
