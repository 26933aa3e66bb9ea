//! Caller-visible handles
//!
//! Handles come from a strictly increasing counter and are never reused for
//! the life of the process, so comparing two handles also compares their
//! submission order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token identifying one outstanding operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsyncHandle(u64);

impl AsyncHandle {
    /// Raw numeric value of the handle
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AsyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues handles in submission order
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    /// Create an allocator whose first handle is 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next handle
    pub fn allocate(&self) -> AsyncHandle {
        AsyncHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
