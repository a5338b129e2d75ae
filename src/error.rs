use std::alloc::{handle_alloc_error, Layout};

use thiserror::Error;

/// Errors surfaced by the fallible table entry points.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The computed buffer size exceeded the addressable maximum.
    #[error("hash table capacity overflow")]
    CapacityOverflow,
    /// The allocator refused a buffer request.
    #[error("allocation of {size} bytes (align {align}) failed")]
    AllocationFailed { size: usize, align: usize },
    /// `at()` was called with a key that is not in the table.
    #[error("key not present in table")]
    MissingKey,
}

pub type Result<T> = std::result::Result<T, TableError>;

/// Whether memory allocation errors should return an error or abort.
#[derive(Copy, Clone)]
pub(crate) enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    /// Error to return on capacity overflow.
    #[inline]
    pub(crate) fn capacity_overflow(self) -> TableError {
        match self {
            Fallibility::Fallible => TableError::CapacityOverflow,
            Fallibility::Infallible => panic!("hash table capacity overflow"),
        }
    }

    /// Error to return on allocation error.
    #[inline]
    pub(crate) fn alloc_err(self, layout: Layout) -> TableError {
        match self {
            Fallibility::Fallible => TableError::AllocationFailed {
                size: layout.size(),
                align: layout.align(),
            },
            Fallibility::Infallible => handle_alloc_error(layout),
        }
    }
}
