//! Error types for rc-ptr.
//!
//! Only allocation can fail. Everything else (failed dynamic casts, expired
//! weak handles) is reported as an empty handle rather than an error.

use std::alloc::Layout;

use thiserror::Error;

/// Result type alias for fallible construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The global allocator returned null for a control block.
    ///
    /// Any pointee that had already been handed over has been disposed
    /// by the time this is returned.
    #[error(
        "failed to allocate control block of {} bytes (align {})",
        .layout.size(),
        .layout.align()
    )]
    AllocFailed { layout: Layout },
}

impl Error {
    pub(crate) fn alloc_failed(layout: Layout) -> Self {
        Error::AllocFailed { layout }
    }

    /// The layout whose allocation failed.
    pub fn layout(&self) -> Layout {
        match self {
            Error::AllocFailed { layout } => *layout,
        }
    }
}

/// Infallible constructors report allocation failure the way `Box` does.
#[cold]
pub(crate) fn handle_alloc_error(err: Error) -> ! {
    std::alloc::handle_alloc_error(err.layout())
}

/// Dereferencing an empty handle.
#[cold]
#[track_caller]
#[allow(clippy::panic)]
pub(crate) fn empty_deref(kind: &str) -> ! {
    panic!("dereferenced an empty {kind} handle")
}
