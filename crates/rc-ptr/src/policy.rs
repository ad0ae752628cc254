//! Counting policy abstraction.
//!
//! This module provides the `AtomicPolicy` trait for abstracting over
//! single-threaded (`Cell`) and thread-safe (atomic) reference counters.

use std::cell::Cell;
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// Counts past this are treated as a leak of handles and abort the process.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Trait abstracting over the counter used by control blocks.
///
/// This allows the same handle implementation to work for both
/// single-threaded and thread-safe scenarios without code duplication.
pub trait AtomicPolicy: 'static {
    /// Counter type for reference counting (`Cell<usize>` or `AtomicUsize`).
    type Counter: Counter;

    /// Create a new counter initialized to the given value.
    fn new_counter(initial: usize) -> Self::Counter;
}

/// Trait for counter operations, abstracting Cell vs Atomic.
///
/// Every mutating operation is a single indivisible step for the policy it
/// belongs to; callers never compose a read with a separate write.
pub trait Counter {
    /// Current value. Advisory under concurrent mutation.
    fn get(&self) -> usize;

    /// Increment, returning the new value.
    fn increment(&self) -> usize;

    /// Decrement, returning the new value.
    ///
    /// When the new value is zero the caller is the unique observer of the
    /// transition and all prior decrements happen-before it returns.
    fn decrement(&self) -> usize;

    /// Increment only if the current value is nonzero.
    ///
    /// Returns `false` without modifying the counter once it has reached zero.
    fn increment_if_nonzero(&self) -> bool;
}

/// Marker for types whose ownership can be tracked under policy `P`.
///
/// Anything can be owned by a `SingleThreaded` block. A `ThreadSafe` block may
/// be released from any thread, so whatever it owns must be `Send + Sync`.
pub trait Shareable<P: AtomicPolicy> {}

impl<T: ?Sized> Shareable<SingleThreaded> for T {}

impl<T: ?Sized + Send + Sync> Shareable<ThreadSafe> for T {}

#[cold]
fn refcount_overflow() -> ! {
    tracing::error!("reference count overflow, aborting");
    std::process::abort()
}

// ============================================================================
// SingleThreaded Policy
// ============================================================================

/// Single-threaded policy using `Cell`.
///
/// Handles built on this policy are neither `Send` nor `Sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl AtomicPolicy for SingleThreaded {
    type Counter = Cell<usize>;

    #[inline]
    fn new_counter(initial: usize) -> Self::Counter {
        Cell::new(initial)
    }
}

impl Counter for Cell<usize> {
    #[inline]
    fn get(&self) -> usize {
        Cell::get(self)
    }

    #[inline]
    fn increment(&self) -> usize {
        let val = self.get();
        if val >= MAX_REFCOUNT {
            refcount_overflow();
        }
        self.set(val + 1);
        val + 1
    }

    #[inline]
    fn decrement(&self) -> usize {
        let val = self.get();
        debug_assert!(val > 0, "Decrementing zero reference count");
        self.set(val - 1);
        val - 1
    }

    #[inline]
    fn increment_if_nonzero(&self) -> bool {
        if self.get() == 0 {
            return false;
        }
        self.increment();
        true
    }
}

// ============================================================================
// ThreadSafe Policy
// ============================================================================

/// Thread-safe policy using `AtomicUsize`.
///
/// Safe for sharing across thread boundaries.
/// Slightly higher overhead due to atomic operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSafe;

impl AtomicPolicy for ThreadSafe {
    type Counter = AtomicUsize;

    #[inline]
    fn new_counter(initial: usize) -> Self::Counter {
        AtomicUsize::new(initial)
    }
}

impl Counter for AtomicUsize {
    #[inline]
    fn get(&self) -> usize {
        self.load(Ordering::Acquire)
    }

    #[inline]
    fn increment(&self) -> usize {
        // A new reference is only ever made from an existing one, which
        // already orders access to the pointee.
        let prev = self.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_REFCOUNT {
            refcount_overflow();
        }
        prev + 1
    }

    #[inline]
    fn decrement(&self) -> usize {
        let prev = self.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "Decrementing zero reference count");
        if prev == 1 {
            // Pairs with the Release above on every other decrement.
            atomic::fence(Ordering::Acquire);
        }
        prev - 1
    }

    #[inline]
    fn increment_if_nonzero(&self) -> bool {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current >= MAX_REFCOUNT {
                refcount_overflow();
            }
            match self.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_counter() {
        let counter = SingleThreaded::new_counter(0);
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_atomic_counter() {
        let counter = ThreadSafe::new_counter(0);
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_increment_if_nonzero_stops_at_zero() {
        let cell = SingleThreaded::new_counter(1);
        assert!(cell.increment_if_nonzero());
        assert_eq!(cell.get(), 2);
        cell.decrement();
        cell.decrement();
        assert!(!cell.increment_if_nonzero());
        assert_eq!(cell.get(), 0);

        let atomic = ThreadSafe::new_counter(1);
        assert!(atomic.increment_if_nonzero());
        assert_eq!(atomic.get(), 2);
        atomic.decrement();
        atomic.decrement();
        assert!(!atomic.increment_if_nonzero());
        assert_eq!(atomic.get(), 0);
    }

    #[test]
    fn test_atomic_counter_concurrent_increments() {
        let counter = ThreadSafe::new_counter(1);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        assert!(counter.increment_if_nonzero());
                        counter.decrement();
                    }
                });
            }
        });
        assert_eq!(counter.get(), 1);
    }
}
