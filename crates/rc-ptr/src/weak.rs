//! Weak references for cycle prevention.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use crate::control::ControlRef;
use crate::policy::{AtomicPolicy, SingleThreaded, ThreadSafe};
use crate::shared::SharedPtr;

/// A weak (non-owning) reference to a shared value.
///
/// Usually named through the [`Weak`] and [`LocalWeak`] aliases.
///
/// Weak references do not keep the value alive, only its control block.
/// They can be locked into a strong [`SharedPtr`] if the value still exists,
/// which makes them the tool for breaking reference cycles.
///
/// # Example
///
/// ```
/// use rc_ptr::Shared;
///
/// let p = Shared::new(42);
/// let weak = p.downgrade();
///
/// // Weak can check if still alive
/// assert!(!weak.expired());
/// assert_eq!(*weak.lock(), 42);
///
/// drop(p);
///
/// // Now it's dead
/// assert!(weak.expired());
/// assert!(weak.lock().is_null());
/// ```
pub struct WeakPtr<T: ?Sized, P: AtomicPolicy> {
    ptr: Option<NonNull<T>>,
    block: Option<ControlRef<P>>,
    writable: bool,
    _marker: PhantomData<T>,
}

/// Thread-safe weak handle (type alias for convenience).
pub type Weak<T> = WeakPtr<T, ThreadSafe>;

/// Single-threaded weak handle (type alias for convenience).
pub type LocalWeak<T> = WeakPtr<T, SingleThreaded>;

// Same reasoning as for `Shared`: a weak handle can produce one.
unsafe impl<T: ?Sized + Send + Sync> Send for WeakPtr<T, ThreadSafe> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for WeakPtr<T, ThreadSafe> {}

impl<T: ?Sized, P: AtomicPolicy> WeakPtr<T, P> {
    /// A weak handle observing nothing. It is always expired.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ptr: None,
            block: None,
            writable: false,
            _marker: PhantomData,
        }
    }

    /// Create a weak reference from a strong handle.
    ///
    /// Observes the same address and block; an empty handle gives an empty
    /// weak reference.
    #[inline]
    pub fn from_shared(shared: &SharedPtr<T, P>) -> Self {
        if let Some(block) = shared.block {
            block.add_weak();
        }
        Self {
            ptr: shared.ptr,
            block: shared.block,
            writable: shared.writable,
            _marker: PhantomData,
        }
    }

    /// Upgrade to a strong handle, incrementing the strong count.
    ///
    /// Returns `None` once the value has been destroyed. A concurrent
    /// release can never be resurrected: the count is only bumped while it
    /// is still nonzero.
    pub fn upgrade(&self) -> Option<SharedPtr<T, P>> {
        let block = self.block?;
        if block.add_strong_if_lockable() {
            Some(SharedPtr::from_counted(self.ptr, Some(block), self.writable))
        } else {
            None
        }
    }

    /// Like [`WeakPtr::upgrade`], but returns an empty handle instead of `None`.
    #[inline]
    pub fn lock(&self) -> SharedPtr<T, P> {
        self.upgrade().unwrap_or_default()
    }

    /// Strong count of the observed block, 0 when empty or expired.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, ControlRef::use_count)
    }

    /// Number of weak handles observing the block, this one included.
    ///
    /// A snapshot only. If the last strong handle is released on another
    /// thread while this runs, the result can be off by one.
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, ControlRef::weak_count)
    }

    /// Check if the referent is gone (or was never there).
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Returns true if both handles observe the same address.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr.map(|p| p.as_ptr().cast::<()>()) == other.ptr.map(|p| p.as_ptr().cast::<()>())
    }

    /// Stop observing, leaving this handle empty.
    #[inline]
    pub fn reset(&mut self) {
        drop(mem::take(self));
    }

    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }
}

impl<T: ?Sized, P: AtomicPolicy> Clone for WeakPtr<T, P> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.add_weak();
        }
        Self {
            ptr: self.ptr,
            block: self.block,
            writable: self.writable,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        let mut tmp = source.clone();
        self.swap(&mut tmp);
    }
}

impl<T: ?Sized, P: AtomicPolicy> Drop for WeakPtr<T, P> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            // Safety: this handle owned one weak reference.
            unsafe { block.release_weak() }
        }
    }
}

impl<T: ?Sized, P: AtomicPolicy> Default for WeakPtr<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized, P: AtomicPolicy> From<&SharedPtr<T, P>> for WeakPtr<T, P> {
    fn from(shared: &SharedPtr<T, P>) -> Self {
        Self::from_shared(shared)
    }
}

impl<T: ?Sized, P: AtomicPolicy> fmt::Debug for WeakPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("use_count", &self.use_count())
            .field("weak_count", &self.weak_count())
            .finish()
    }
}
