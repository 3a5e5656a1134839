//! Typed errors for domain registration.

use crate::domain::MAX_THREADS;
use core::fmt;

/// Errors returned by [`Domain::register`](crate::Domain::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// Every slot in the domain's table is claimed by a live handle.
    SlotsExhausted,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::SlotsExhausted => {
                write!(f, "thread slot table exhausted (max {MAX_THREADS})")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegisterError {}
