//! Shared-ownership handle.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::NonNull;

use crate::control::{self, ControlRef};
use crate::deleter::Deleter;
use crate::error::{empty_deref, handle_alloc_error, Result};
use crate::policy::{AtomicPolicy, Shareable, SingleThreaded, ThreadSafe};
use crate::unique::{Null, Unique};
use crate::weak::WeakPtr;

/// A reference-counted pointer with an explicit (address, owner) pair.
///
/// `SharedPtr<T, P>` behaves like `Arc<T>` (or `Rc<T>` under
/// [`SingleThreaded`]) with two differences: the address it reports may
/// differ from the object its control block owns (see
/// [`SharedPtr::aliasing`] and [`SharedPtr::map`]), and it may be empty.
///
/// Most code names it through the [`Shared`] and [`LocalShared`] aliases,
/// which fix the counting policy.
///
/// Equality, ordering and hashing compare the pointee *address*, not the
/// pointee value, so handles work as identity keys in maps and sets.
///
/// # Example
///
/// ```
/// use rc_ptr::Shared;
///
/// let p = Shared::new(42);
/// assert_eq!(*p, 42);
/// assert_eq!(p.use_count(), 1);
///
/// let q = p.clone();
/// assert_eq!(p.use_count(), 2);
/// drop(q);
/// assert_eq!(p.use_count(), 1);
/// ```
pub struct SharedPtr<T: ?Sized, P: AtomicPolicy> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<ControlRef<P>>,
    /// Set only when `ptr` came from the block's constructor, so it may be
    /// used for writes. Views built from a `&T` never get it.
    pub(crate) writable: bool,
    _marker: PhantomData<T>,
}

/// Thread-safe shared handle (type alias for convenience).
pub type Shared<T> = SharedPtr<T, ThreadSafe>;

/// Single-threaded shared handle (type alias for convenience).
pub type LocalShared<T> = SharedPtr<T, SingleThreaded>;

// A thread-safe block only ever owns `Send + Sync` values (see `Shareable`),
// so the handle is as shareable as the pointee it exposes.
unsafe impl<T: ?Sized + Send + Sync> Send for SharedPtr<T, ThreadSafe> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedPtr<T, ThreadSafe> {}

/// Construct a value and its control block in a single allocation.
///
/// Equivalent to [`SharedPtr::new`]; the policy comes from the expected type.
///
/// ```
/// use rc_ptr::{make_shared, LocalShared};
///
/// let p: LocalShared<Vec<u8>> = make_shared(vec![1, 2]);
/// assert_eq!(p.len(), 2);
/// ```
#[inline]
pub fn make_shared<T, P>(value: T) -> SharedPtr<T, P>
where
    T: Shareable<P> + 'static,
    P: AtomicPolicy,
{
    SharedPtr::new(value)
}

/// Like [`make_shared`], but builds the value inside the new block.
#[inline]
pub fn make_shared_with<T, P, F>(init: F) -> SharedPtr<T, P>
where
    T: Shareable<P> + 'static,
    P: AtomicPolicy,
    F: FnOnce() -> T,
{
    SharedPtr::new_with(init)
}

impl<T: ?Sized, P: AtomicPolicy> SharedPtr<T, P> {
    /// An empty handle: no pointee, no control block.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            ptr: None,
            block: None,
            writable: false,
            _marker: PhantomData,
        }
    }

    /// Assemble a handle from a strong reference the caller already took.
    #[inline]
    pub(crate) fn from_counted(
        ptr: Option<NonNull<T>>,
        block: Option<ControlRef<P>>,
        writable: bool,
    ) -> Self {
        Self {
            ptr,
            block,
            writable,
            _marker: PhantomData,
        }
    }

    /// Take ownership of a boxed value, allocating a separate control block.
    ///
    /// Works for unsized values, so a `Box<dyn Trait>` or `Box<[T]>` can be
    /// shared directly.
    pub fn from_box(value: Box<T>) -> Self
    where
        T: Shareable<P> + 'static,
    {
        Self::try_from_box(value).unwrap_or_else(|err| handle_alloc_error(err))
    }

    /// Fallible [`SharedPtr::from_box`].
    ///
    /// If the control block cannot be allocated the box is dropped before the
    /// error is returned.
    pub fn try_from_box(value: Box<T>) -> Result<Self>
    where
        T: Shareable<P> + 'static,
    {
        let (ptr, block) = control::new_pointer_block(value)?;
        Ok(Self::from_counted(Some(ptr), Some(block), true))
    }

    /// Take ownership of a pointer produced by `Box::into_raw`.
    ///
    /// A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and must not be used
    /// by the caller afterwards.
    pub unsafe fn from_raw(ptr: *mut T) -> Self
    where
        T: Shareable<P> + 'static,
    {
        match NonNull::new(ptr) {
            // Safety: as per pre-condition.
            Some(ptr) => Self::from_box(unsafe { Box::from_raw(ptr.as_ptr()) }),
            None => Self::empty(),
        }
    }

    /// Take ownership of `ptr`, releasing it with `deleter` once the last
    /// strong handle is gone.
    ///
    /// # Safety
    ///
    /// The caller must own `ptr`, it must stay valid until `deleter` runs, and
    /// `deleter` must be able to release it.
    pub unsafe fn from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        T: Shareable<P> + 'static,
        D: Deleter<T> + Shareable<P> + 'static,
    {
        // Safety: as per pre-condition.
        unsafe { Self::try_from_raw_with_deleter(ptr, deleter) }
            .unwrap_or_else(|err| handle_alloc_error(err))
    }

    /// Fallible [`SharedPtr::from_raw_with_deleter`].
    ///
    /// If the control block cannot be allocated, `deleter` is run on `ptr`
    /// before the error is returned.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::from_raw_with_deleter`].
    pub unsafe fn try_from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Result<Self>
    where
        T: Shareable<P> + 'static,
        D: Deleter<T> + Shareable<P> + 'static,
    {
        // Safety: as per pre-condition.
        let block = unsafe { control::new_deleter_block(ptr, deleter)? };
        Ok(Self::from_counted(Some(ptr), Some(block), true))
    }

    /// Share the ownership of `owner` while pointing at `ptr`.
    ///
    /// This is the aliasing constructor: the new handle keeps whatever `owner`
    /// owns alive, but [`get`](Self::get) returns `ptr`. The strong count is
    /// incremented if `owner` has a control block.
    ///
    /// Prefer [`SharedPtr::map`] when `ptr` can be reached by reference from the
    /// owned value.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads for as long as any handle sharing
    /// `owner`'s control block is alive. The result is read-only:
    /// [`get_mut`](SharedPtr::get_mut) always refuses it.
    pub unsafe fn aliasing<U: ?Sized>(owner: &SharedPtr<U, P>, ptr: NonNull<T>) -> Self {
        if let Some(block) = owner.block {
            block.add_strong();
        }
        Self::from_counted(Some(ptr), owner.block, false)
    }

    /// Like [`SharedPtr::aliasing`], but consumes `owner` and leaves the counts
    /// untouched.
    ///
    /// # Safety
    ///
    /// Same as [`SharedPtr::aliasing`].
    pub unsafe fn aliasing_owned<U: ?Sized>(owner: SharedPtr<U, P>, ptr: NonNull<T>) -> Self {
        let owner = ManuallyDrop::new(owner);
        Self::from_counted(Some(ptr), owner.block, false)
    }

    /// Share ownership while pointing at a part or view of the pointee.
    ///
    /// An empty handle maps to an empty handle.
    ///
    /// ```
    /// use rc_ptr::Shared;
    ///
    /// struct Config { name: String, retries: u32 }
    ///
    /// let config = Shared::new(Config { name: "db".into(), retries: 3 });
    /// let name: Shared<String> = config.map(|c| &c.name);
    /// drop(config);
    ///
    /// // The whole `Config` stays alive through `name`.
    /// assert_eq!(*name, "db");
    /// assert_eq!(name.use_count(), 1);
    /// ```
    pub fn map<U: ?Sized>(&self, f: impl FnOnce(&T) -> &U) -> SharedPtr<U, P> {
        match self.get() {
            // Safety: the reference borrows from the pointee (or outlives it),
            // and the shared block keeps the pointee alive.
            Some(value) => unsafe { SharedPtr::aliasing(self, NonNull::from(f(value))) },
            None => SharedPtr::empty(),
        }
    }

    /// Like [`SharedPtr::map`], but yields an empty handle when `f` returns `None`.
    pub fn try_map<U: ?Sized>(&self, f: impl FnOnce(&T) -> Option<&U>) -> SharedPtr<U, P> {
        match self.get().and_then(f) {
            // Safety: as in `map`.
            Some(part) => unsafe { SharedPtr::aliasing(self, NonNull::from(part)) },
            None => SharedPtr::empty(),
        }
    }

    /// Get a shared reference to the pointee, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // Safety: a present pointer is kept valid by the control block (or by
        // the caller of `aliasing`).
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// The pointee address, without touching any count.
    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Get the current strong count, 0 for a handle without a control block.
    ///
    /// Advisory: other threads may change it right after it is read.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, ControlRef::use_count)
    }

    /// Get the number of [`WeakPtr`] handles observing the same block.
    ///
    /// Advisory, like [`use_count`](Self::use_count): strong and weak counts
    /// are read separately, so a concurrent last release can make the result
    /// off by one.
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, ControlRef::weak_count)
    }

    /// Returns true if this is the only strong reference.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.use_count() == 1
    }

    /// Returns true if the handle points at nothing.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Returns true if both handles report the same address.
    #[inline]
    pub fn ptr_eq<U: ?Sized, Q: AtomicPolicy>(&self, other: &SharedPtr<U, Q>) -> bool {
        self.addr() == other.addr()
    }

    /// Returns true if both handles share one control block, whatever they
    /// point at.
    #[inline]
    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U, P>) -> bool {
        self.block.is_some() && self.block == other.block
    }

    /// Create a weak handle to the same pointee.
    #[inline]
    pub fn downgrade(&self) -> WeakPtr<T, P> {
        WeakPtr::from_shared(self)
    }

    /// Release this handle's reference, leaving it empty.
    #[inline]
    pub fn reset(&mut self) {
        drop(mem::take(self));
    }

    /// Move the contents out, leaving this handle empty.
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    pub(crate) fn addr(&self) -> usize {
        self.ptr.map_or(0, |ptr| ptr.as_ptr().cast::<()>() as usize)
    }

    /// True when this handle is the sole owner and holds the pointer its block
    /// was built with.
    fn is_exclusive(&self) -> bool {
        match (self.ptr, self.block) {
            (Some(ptr), Some(block)) if self.writable => {
                block.use_count() == 1
                    && block.weak_count() == 0
                    && block.owns(ptr.as_ptr().cast::<()>())
            }
            _ => false,
        }
    }
}

impl<T: Shareable<P> + 'static, P: AtomicPolicy> SharedPtr<T, P> {
    /// Create a new shared value with a single allocation for the value and
    /// its control block.
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap_or_else(|err| handle_alloc_error(err))
    }

    /// Fallible [`SharedPtr::new`].
    pub fn try_new(value: T) -> Result<Self> {
        Self::try_new_with(move || value)
    }

    /// Allocate the combined block first, then construct the value into it.
    ///
    /// If `init` panics the block is freed and the panic propagates.
    pub fn new_with<F: FnOnce() -> T>(init: F) -> Self {
        Self::try_new_with(init).unwrap_or_else(|err| handle_alloc_error(err))
    }

    /// Fallible [`SharedPtr::new_with`]. `init` does not run if allocation fails.
    pub fn try_new_with<F: FnOnce() -> T>(init: F) -> Result<Self> {
        let (ptr, block) = control::new_inline_block(init)?;
        Ok(Self::from_counted(Some(ptr), Some(block), true))
    }
}

impl<T: ?Sized> SharedPtr<T, SingleThreaded> {
    /// Try to get mutable access if this is the only reference.
    ///
    /// Returns `Some(&mut T)` when no other strong or weak handle shares the
    /// block and this handle was created by a constructor (or cloned from
    /// one), `None` otherwise. Handles from `map`, the casts or aliasing are
    /// read-only views and always get `None`. This is the in-place mutation path: no copy is made.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if !self.is_exclusive() {
            return None;
        }
        // Safety: sole owner, so nothing else can observe the pointee.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }
}

impl<T: Clone + 'static> SharedPtr<T, SingleThreaded> {
    /// Get mutable access, cloning if necessary.
    ///
    /// If this is the only reference, returns a mutable reference.
    /// Otherwise, clones the value into a fresh block first.
    ///
    /// # Panics
    ///
    /// If the handle is empty.
    pub fn make_mut(&mut self) -> &mut T {
        if !self.is_exclusive() {
            let value = T::clone(&**self);
            *self = SharedPtr::new(value);
        }
        match self.ptr {
            // Safety: exclusive owner of a populated handle.
            Some(mut ptr) => unsafe { ptr.as_mut() },
            None => empty_deref("Shared"),
        }
    }
}

impl<T: ?Sized, P: AtomicPolicy> Clone for SharedPtr<T, P> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.add_strong();
        }
        Self::from_counted(self.ptr, self.block, self.writable)
    }

    /// Assignment: build the new reference first, then swap it in.
    fn clone_from(&mut self, source: &Self) {
        let mut tmp = source.clone();
        self.swap(&mut tmp);
    }
}

impl<T: ?Sized, P: AtomicPolicy> Drop for SharedPtr<T, P> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            // Safety: this handle owned one strong reference.
            unsafe { block.release_strong() }
        }
    }
}

impl<T: ?Sized, P: AtomicPolicy> Default for SharedPtr<T, P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized, P: AtomicPolicy> Deref for SharedPtr<T, P> {
    type Target = T;

    /// # Panics
    ///
    /// If the handle is empty.
    #[inline]
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => empty_deref("Shared"),
        }
    }
}

impl<T: ?Sized, P: AtomicPolicy> AsRef<T> for SharedPtr<T, P> {
    #[track_caller]
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Shareable<P> + 'static, P: AtomicPolicy> From<T> for SharedPtr<T, P> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized + Shareable<P> + 'static, P: AtomicPolicy> From<Box<T>> for SharedPtr<T, P> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T, D, P> From<Unique<T, D>> for SharedPtr<T, P>
where
    T: ?Sized + Shareable<P> + 'static,
    D: Deleter<T> + Shareable<P> + 'static,
    P: AtomicPolicy,
{
    /// Move a unique pointer and its deleter under shared ownership.
    fn from(unique: Unique<T, D>) -> Self {
        match unique.into_parts() {
            // Safety: the unique handle owned `ptr` and its deleter releases it.
            (Some(ptr), deleter) => unsafe { Self::from_raw_with_deleter(ptr, deleter) },
            (None, _) => Self::empty(),
        }
    }
}

impl<T: ?Sized + fmt::Debug, P: AtomicPolicy> fmt::Debug for SharedPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &self.get())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized, P: AtomicPolicy> fmt::Pointer for SharedPtr<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(self.addr() as *const ()), f)
    }
}

// Identity comparisons: two handles are equal when they report the same
// address, regardless of pointee type or owner.

impl<T: ?Sized, U: ?Sized, P: AtomicPolicy, Q: AtomicPolicy> PartialEq<SharedPtr<U, Q>>
    for SharedPtr<T, P>
{
    #[inline]
    fn eq(&self, other: &SharedPtr<U, Q>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized, P: AtomicPolicy> Eq for SharedPtr<T, P> {}

impl<T: ?Sized, U: ?Sized, P: AtomicPolicy, Q: AtomicPolicy> PartialOrd<SharedPtr<U, Q>>
    for SharedPtr<T, P>
{
    #[inline]
    fn partial_cmp(&self, other: &SharedPtr<U, Q>) -> Option<Ordering> {
        Some(self.addr().cmp(&other.addr()))
    }
}

impl<T: ?Sized, P: AtomicPolicy> Ord for SharedPtr<T, P> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: ?Sized, P: AtomicPolicy> Hash for SharedPtr<T, P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized, P: AtomicPolicy> PartialEq<Null> for SharedPtr<T, P> {
    #[inline]
    fn eq(&self, _: &Null) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized, P: AtomicPolicy> PartialEq<SharedPtr<T, P>> for Null {
    #[inline]
    fn eq(&self, other: &SharedPtr<T, P>) -> bool {
        other.is_null()
    }
}
