//! Petek: epoch-based memory reclamation for lock-free data structures.
//!
//! Petek implements the classic 3-epoch reclamation scheme with per-thread
//! retire queues, so the retire fast path never touches a lock or another
//! thread's cache line.
//!
//! # Key Features
//!
//! - **Per-domain state**: each [`Domain`] owns its epoch counter and slot
//!   table, so a data structure embeds its own reclamation domain and a
//!   thread can outlive one domain and use another.
//! - **Lock-free retire path**: every registered thread owns three retire
//!   queues (one per epoch modulus) that only it writes to or frees from.
//! - **Tagged pointers**: [`Atomic`] and [`Shared`] carry a low-bit mark
//!   for Harris-style logical deletion.
//!
//! # Example
//!
//! ```rust
//! use petek::Domain;
//!
//! let domain = Domain::new();
//! let handle = domain.register().expect("slot available");
//!
//! // Enter a critical section.
//! let guard = handle.pin();
//!
//! // Hand an unlinked allocation to the domain for deferred freeing.
//! let ptr = Box::into_raw(Box::new(42u64));
//! unsafe { guard.retire(ptr) };
//!
//! drop(guard);
//! ```

#![warn(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod atomic;
mod domain;
mod error;
mod guard;
mod retired;

pub use atomic::{Atomic, Shared};
pub use domain::{Domain, EPOCHS, MAX_THREADS};
pub use error::RegisterError;
pub use guard::{Guard, Handle};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
