//! Petek-map: a lock-free concurrent hash map over a single split-ordered
//! list, with petek epoch-based memory reclamation.
//!
//! Every entry lives in one global linked list sorted by the bit-reversal
//! of its hash (Shalev–Shavit split ordering), so each hash bucket's
//! entries form a contiguous run entered through a lazily created sentinel
//! node. Growing the map just doubles the bucket index; entries never
//! move. Deletion is Harris-style: mark the node's `next` pointer, then
//! let the next traversal unlink and retire it.
//!
//! # Key Features
//!
//! - **Lock-free `get`/`insert`/`remove`** via CAS on tagged pointers
//! - **Amortized growth**: no stop-the-world rehash, ever
//! - **Safe reclamation**: unlinked nodes and replaced bucket arrays are
//!   freed through a per-map [`petek::Domain`]
//!
//! # Example
//!
//! ```rust
//! use core::ptr::NonNull;
//! use petek_map::SplitOrderedMap;
//!
//! let map = SplitOrderedMap::new();
//! let handle = map.register().expect("slot available");
//!
//! let value = 42u64;
//! let v = NonNull::from(&value);
//! assert_eq!(handle.insert(7, v), None);
//! assert_eq!(handle.get(7), Some(v));
//! assert_eq!(handle.remove(7), Some(v));
//! assert_eq!(handle.get(7), None);
//! ```
//!
//! The map stores opaque `NonNull<V>` handles and never touches the
//! pointees: allocating and freeing values is the caller's job. Key `0`
//! is reserved and rejected by every operation.

#![warn(missing_docs)]
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod list;
mod map;
mod order;

pub use map::{Iter, MapHandle, SplitOrderedMap};
pub use petek::RegisterError;
