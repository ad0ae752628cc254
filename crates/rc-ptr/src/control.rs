//! Control blocks: the lifetime record shared by `Shared` and `Weak` handles.
//!
//! A block carries a strong and a weak counter. Both start at 1: the weak
//! side holds one implicit reference on behalf of all strong references,
//! released right after the pointee is disposed. The block's own memory is
//! freed when the weak counter reaches zero.
//!
//! Three variants differ only in how the pointee is disposed:
//!
//! - [`PointerBlock`]: owns a pointer from `Box::into_raw` and drops the box.
//! - [`DeleterBlock`]: owns a pointer plus a [`Deleter`] and invokes it.
//! - [`InlineBlock`]: stores the value inside the block (combined allocation)
//!   and drops it in place.

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::deleter::Deleter;
use crate::error::{Error, Result};
use crate::policy::{AtomicPolicy, Counter};

/// Strong and weak counters of one block.
pub(crate) struct RefCounts<P: AtomicPolicy> {
    strong: P::Counter,
    weak: P::Counter,
}

impl<P: AtomicPolicy> RefCounts<P> {
    fn new() -> Self {
        Self {
            strong: P::new_counter(1),
            weak: P::new_counter(1),
        }
    }
}

/// Operations every block variant provides.
pub(crate) trait ControlBlock<P: AtomicPolicy> {
    fn counts(&self) -> &RefCounts<P>;

    /// Address of the object this block owns.
    fn owned(&self) -> *const ();

    /// Destroy the pointee, leaving the block itself alive.
    ///
    /// # Safety
    ///
    /// Called once, by whoever observed the strong count reach zero.
    unsafe fn dispose(&self);
}

// ============================================================================
// Variants
// ============================================================================

pub(crate) struct PointerBlock<T: ?Sized, P: AtomicPolicy> {
    counts: RefCounts<P>,
    ptr: NonNull<T>,
}

impl<T: ?Sized, P: AtomicPolicy> ControlBlock<P> for PointerBlock<T, P> {
    fn counts(&self) -> &RefCounts<P> {
        &self.counts
    }

    fn owned(&self) -> *const () {
        self.ptr.as_ptr().cast::<()>()
    }

    unsafe fn dispose(&self) {
        // Safety: `ptr` came from `Box::into_raw` and the strong side is gone.
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) }
    }
}

pub(crate) struct DeleterBlock<T: ?Sized, D, P: AtomicPolicy> {
    counts: RefCounts<P>,
    ptr: NonNull<T>,
    deleter: UnsafeCell<D>,
}

impl<T: ?Sized, D: Deleter<T>, P: AtomicPolicy> ControlBlock<P> for DeleterBlock<T, D, P> {
    fn counts(&self) -> &RefCounts<P> {
        &self.counts
    }

    fn owned(&self) -> *const () {
        self.ptr.as_ptr().cast::<()>()
    }

    unsafe fn dispose(&self) {
        // Safety: dispose runs once, so nothing else touches the deleter.
        unsafe { (*self.deleter.get()).delete(self.ptr) }
    }
}

pub(crate) struct InlineBlock<T, P: AtomicPolicy> {
    counts: RefCounts<P>,
    constructed: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T, P: AtomicPolicy> ControlBlock<P> for InlineBlock<T, P> {
    fn counts(&self) -> &RefCounts<P> {
        &self.counts
    }

    fn owned(&self) -> *const () {
        self.value.get().cast::<()>()
    }

    unsafe fn dispose(&self) {
        if self.constructed.swap(false, Ordering::Relaxed) {
            // Safety: the flag was set, so the value is initialized, and it
            // is cleared now so the value is dropped only once.
            unsafe { ptr::drop_in_place(UnsafeCell::raw_get(&self.value).cast::<T>()) }
        }
    }
}

// ============================================================================
// Allocation
// ============================================================================

/// Allocate uninitialized memory for a block of type `B`.
fn allocate<B>() -> Result<NonNull<B>> {
    let layout = Layout::new::<B>();
    debug_assert!(layout.size() != 0, "control blocks always carry counters");

    #[cfg(test)]
    if failpoint::take() {
        return Err(Error::alloc_failed(layout));
    }

    // Safety: the layout is not zero-sized.
    let raw = unsafe { alloc::alloc(layout) };
    NonNull::new(raw.cast::<B>()).ok_or_else(|| Error::alloc_failed(layout))
}

/// Frees a block's memory without running any destructor.
struct DeallocGuard {
    mem: NonNull<u8>,
    layout: Layout,
}

impl Drop for DeallocGuard {
    fn drop(&mut self) {
        // Safety: `mem` was allocated with `layout` and nothing lives in it.
        unsafe { alloc::dealloc(self.mem.as_ptr(), self.layout) }
    }
}

/// Hand a boxed value to a new pointer block.
///
/// If the block cannot be allocated the box is dropped before the error is
/// returned.
pub(crate) fn new_pointer_block<T, P>(value: Box<T>) -> Result<(NonNull<T>, ControlRef<P>)>
where
    T: ?Sized + 'static,
    P: AtomicPolicy,
{
    let mem = match allocate::<PointerBlock<T, P>>() {
        Ok(mem) => mem,
        Err(err) => {
            tracing::debug!(%err, "dropping boxed pointee after block allocation failure");
            drop(value);
            return Err(err);
        }
    };

    let ptr = NonNull::from(Box::leak(value));
    // Safety: fresh allocation with the layout of `PointerBlock<T, P>`.
    unsafe {
        mem.as_ptr().write(PointerBlock {
            counts: RefCounts::new(),
            ptr,
        })
    };
    tracing::trace!(block = ?mem, "allocated pointer block");

    let block: NonNull<dyn ControlBlock<P>> = mem;
    Ok((ptr, ControlRef(block)))
}

/// Hand a raw pointer and its deleter to a new deleter block.
///
/// If the block cannot be allocated the deleter is invoked on `ptr` before
/// the error is returned.
///
/// # Safety
///
/// `deleter` must be able to release `ptr`, which the caller owns.
pub(crate) unsafe fn new_deleter_block<T, D, P>(ptr: NonNull<T>, mut deleter: D) -> Result<ControlRef<P>>
where
    T: ?Sized + 'static,
    D: Deleter<T> + 'static,
    P: AtomicPolicy,
{
    let mem = match allocate::<DeleterBlock<T, D, P>>() {
        Ok(mem) => mem,
        Err(err) => {
            tracing::debug!(%err, "running deleter after block allocation failure");
            // Safety: as per pre-condition.
            unsafe { deleter.delete(ptr) };
            return Err(err);
        }
    };

    // Safety: fresh allocation with the layout of `DeleterBlock<T, D, P>`.
    unsafe {
        mem.as_ptr().write(DeleterBlock {
            counts: RefCounts::new(),
            ptr,
            deleter: UnsafeCell::new(deleter),
        })
    };
    tracing::trace!(block = ?mem, "allocated deleter block");

    let block: NonNull<dyn ControlBlock<P>> = mem;
    Ok(ControlRef(block))
}

/// Allocate an inline block, then construct the value into it.
///
/// `init` only runs once the block exists. If it panics, the block memory is
/// released and nothing is leaked.
pub(crate) fn new_inline_block<T, P, F>(init: F) -> Result<(NonNull<T>, ControlRef<P>)>
where
    T: 'static,
    P: AtomicPolicy,
    F: FnOnce() -> T,
{
    let mem = allocate::<InlineBlock<T, P>>()?;
    let raw = mem.as_ptr();

    // Safety: fresh allocation, fields are written before anything reads them.
    unsafe {
        ptr::addr_of_mut!((*raw).counts).write(RefCounts::new());
        ptr::addr_of_mut!((*raw).constructed).write(AtomicBool::new(false));
    }

    let guard = DeallocGuard {
        mem: mem.cast(),
        layout: Layout::new::<InlineBlock<T, P>>(),
    };
    let value = init();
    mem::forget(guard);

    // Safety: `value` lives in the block from here on; `constructed` records it.
    let ptr = unsafe {
        let slot = UnsafeCell::raw_get(ptr::addr_of!((*raw).value)).cast::<T>();
        slot.write(value);
        (*raw).constructed.store(true, Ordering::Relaxed);
        NonNull::new_unchecked(slot)
    };
    tracing::trace!(block = ?mem, "allocated inline block");

    let block: NonNull<dyn ControlBlock<P>> = mem;
    Ok((ptr, ControlRef(block)))
}

// ============================================================================
// Counting
// ============================================================================

/// A counted reference to a control block.
///
/// This is a plain pointer: it neither adds nor releases references on its
/// own. The handle types decide when to call the counting methods.
pub(crate) struct ControlRef<P: AtomicPolicy>(NonNull<dyn ControlBlock<P>>);

impl<P: AtomicPolicy> Clone for ControlRef<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: AtomicPolicy> Copy for ControlRef<P> {}

impl<P: AtomicPolicy> PartialEq for ControlRef<P> {
    fn eq(&self, other: &Self) -> bool {
        ptr::addr_eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl<P: AtomicPolicy> fmt::Debug for ControlRef<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlRef({:p})", self.0)
    }
}

impl<P: AtomicPolicy> ControlRef<P> {
    #[inline]
    fn counts(&self) -> &RefCounts<P> {
        // Safety: a `ControlRef` is only held alongside a strong or weak
        // reference, which keeps the block memory alive.
        unsafe { self.0.as_ref().counts() }
    }

    #[inline]
    pub(crate) fn add_strong(self) {
        self.counts().strong.increment();
    }

    /// Take a strong reference unless the pointee is already gone.
    #[inline]
    pub(crate) fn add_strong_if_lockable(self) -> bool {
        self.counts().strong.increment_if_nonzero()
    }

    #[inline]
    pub(crate) fn add_weak(self) {
        self.counts().weak.increment();
    }

    /// Give up one strong reference, disposing the pointee on the last one.
    ///
    /// # Safety
    ///
    /// The caller owns a strong reference and does not use it afterwards.
    #[inline]
    pub(crate) unsafe fn release_strong(self) {
        if self.counts().strong.decrement() == 0 {
            tracing::trace!(block = ?self.0, "disposing pointee");
            // Safety: we observed the transition to zero, so we are the
            // only caller.
            unsafe {
                self.0.as_ref().dispose();
                self.release_weak();
            }
        }
    }

    /// Give up one weak reference, freeing the block on the last one.
    ///
    /// # Safety
    ///
    /// The caller owns a weak reference and does not use it afterwards.
    #[inline]
    pub(crate) unsafe fn release_weak(self) {
        if self.counts().weak.decrement() == 0 {
            // Safety: no references remain.
            unsafe { self.destroy() }
        }
    }

    /// Drop the block in place and return its memory.
    unsafe fn destroy(self) {
        tracing::trace!(block = ?self.0, "freeing control block");
        // Safety: the weak count reached zero, nothing else points here.
        unsafe {
            let layout = Layout::for_value(self.0.as_ref());
            ptr::drop_in_place(self.0.as_ptr());
            alloc::dealloc(self.0.as_ptr().cast::<u8>(), layout);
        }
    }

    /// Whether `ptr` addresses the object this block owns.
    #[inline]
    pub(crate) fn owns(self, ptr: *const ()) -> bool {
        // Safety: see `counts`.
        let owned = unsafe { self.0.as_ref().owned() };
        ptr::eq(owned, ptr)
    }

    /// Number of strong references. Advisory under concurrent use.
    #[inline]
    pub(crate) fn use_count(self) -> usize {
        self.counts().strong.get()
    }

    /// Number of weak handles, not counting the implicit one.
    ///
    /// The two counts are loaded separately. A final strong release between
    /// the loads can skew the result by one, so callers treat it as advisory.
    #[inline]
    pub(crate) fn weak_count(self) -> usize {
        let counts = self.counts();
        let strong = counts.strong.get();
        let weak = counts.weak.get();
        if strong > 0 {
            weak.saturating_sub(1)
        } else {
            weak
        }
    }
}

#[cfg(test)]
pub(crate) mod failpoint {
    //! Forces the next block allocation on this thread to fail.

    use std::cell::Cell;

    thread_local! {
        static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
    }

    pub(crate) fn fail_next_allocation() {
        FAIL_NEXT.with(|flag| flag.set(true));
    }

    pub(super) fn take() -> bool {
        FAIL_NEXT.with(|flag| flag.replace(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SingleThreaded, ThreadSafe};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts pointee deletions; its own drop marks the block as freed.
    struct Witness {
        deleted: Rc<Cell<u32>>,
        freed: Rc<Cell<u32>>,
    }

    impl Deleter<i32> for Witness {
        unsafe fn delete(&mut self, ptr: NonNull<i32>) {
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            self.deleted.set(self.deleted.get() + 1);
        }
    }

    impl Drop for Witness {
        fn drop(&mut self) {
            self.freed.set(self.freed.get() + 1);
        }
    }

    fn witness_block() -> (ControlRef<SingleThreaded>, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let deleted = Rc::new(Cell::new(0));
        let freed = Rc::new(Cell::new(0));
        let witness = Witness {
            deleted: deleted.clone(),
            freed: freed.clone(),
        };
        let ptr = NonNull::from(Box::leak(Box::new(5)));
        let block = unsafe { new_deleter_block(ptr, witness) }.unwrap();
        (block, deleted, freed)
    }

    #[test]
    fn test_new_block_counts() {
        let (block, _, _) = witness_block();
        assert_eq!(block.use_count(), 1);
        assert_eq!(block.weak_count(), 0);
        unsafe { block.release_strong() };
    }

    #[test]
    fn test_last_strong_disposes_and_frees() {
        let (block, deleted, freed) = witness_block();
        block.add_strong();
        assert_eq!(block.use_count(), 2);

        unsafe { block.release_strong() };
        assert_eq!(deleted.get(), 0);

        unsafe { block.release_strong() };
        assert_eq!(deleted.get(), 1);
        assert_eq!(freed.get(), 1);
    }

    #[test]
    fn test_weak_keeps_block_but_not_pointee() {
        let (block, deleted, freed) = witness_block();
        block.add_weak();
        assert_eq!(block.weak_count(), 1);

        unsafe { block.release_strong() };
        assert_eq!(deleted.get(), 1);
        assert_eq!(freed.get(), 0);
        assert_eq!(block.use_count(), 0);
        assert!(!block.add_strong_if_lockable());

        unsafe { block.release_weak() };
        assert_eq!(freed.get(), 1);
    }

    #[test]
    fn test_inline_block_holds_value() {
        let (ptr, block) = new_inline_block::<_, ThreadSafe, _>(|| String::from("inline")).unwrap();
        assert_eq!(unsafe { ptr.as_ref() }, "inline");
        assert_eq!(block.use_count(), 1);
        unsafe { block.release_strong() };
    }

    #[test]
    fn test_inline_block_dispose_runs_once() {
        let drops = Rc::new(Cell::new(0));

        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let (_, block) =
            new_inline_block::<_, SingleThreaded, _>(|| Tracker(drops.clone())).unwrap();
        block.add_weak();
        unsafe {
            block.release_strong();
            // A stray second dispose finds `constructed` cleared.
            block.0.as_ref().dispose();
        }
        assert_eq!(drops.get(), 1);
        unsafe { block.release_weak() };
    }

    #[test]
    fn test_inline_block_init_panic_does_not_leak() {
        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let captured = Tracker(drops.clone());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            new_inline_block::<u64, SingleThreaded, _>(move || {
                let _held = captured;
                panic!("constructor failed")
            })
        }));
        assert!(result.is_err());
        // The captured state unwinds with the constructor.
        assert_eq!(drops.get(), 1);

        // The failed block was released; the next one is built normally.
        let (ptr, block) = new_inline_block::<_, SingleThreaded, _>(|| 5u64).unwrap();
        assert_eq!(unsafe { *ptr.as_ref() }, 5);
        assert_eq!(block.use_count(), 1);
        unsafe { block.release_strong() };
    }

    #[test]
    fn test_failed_allocation_runs_deleter() {
        let deleted = Rc::new(Cell::new(0));
        let freed = Rc::new(Cell::new(0));
        let witness = Witness {
            deleted: deleted.clone(),
            freed: freed.clone(),
        };
        let ptr = NonNull::from(Box::leak(Box::new(9)));

        failpoint::fail_next_allocation();
        let result = unsafe { new_deleter_block::<_, _, SingleThreaded>(ptr, witness) };

        assert!(matches!(result, Err(Error::AllocFailed { .. })));
        assert_eq!(deleted.get(), 1);
        assert_eq!(freed.get(), 1);
    }

    #[test]
    fn test_failed_allocation_drops_box() {
        let drops = Rc::new(Cell::new(0));

        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        failpoint::fail_next_allocation();
        let result = new_pointer_block::<_, SingleThreaded>(Box::new(Tracker(drops.clone())));
        assert!(result.is_err());
        assert_eq!(drops.get(), 1);
    }
}
