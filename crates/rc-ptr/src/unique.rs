//! Exclusive-ownership handle.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::ptr::{self, NonNull};

use crate::deleter::{DefaultDelete, Deleter};
use crate::error::empty_deref;

/// Sentinel for comparing a handle against emptiness.
///
/// ```
/// use rc_ptr::{Null, Unique};
///
/// let mut p = Unique::new(5);
/// assert!(p != Null);
/// p.reset();
/// assert!(p == Null);
/// assert!(Null == p);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Null;

/// A single-owner pointer with a pluggable [`Deleter`].
///
/// `Unique<T>` is `Box<T>` that may be empty and that can release its
/// pointee through any destruction policy. It is move-only; it never
/// allocates anything besides the pointee, and a zero-sized deleter adds no
/// space.
///
/// # Example
///
/// ```
/// use rc_ptr::Unique;
///
/// let mut a = Unique::new(String::from("owned"));
/// let b = a.take();
/// assert!(a.is_null());
/// assert_eq!(*b, "owned");
/// ```
pub struct Unique<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for Unique<T, D> {}
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for Unique<T, D> {}

/// Box `value` into a new unique handle.
#[inline]
pub fn make_unique<T>(value: T) -> Unique<T> {
    Unique::new(value)
}

/// A unique handle to `len` default-initialized elements.
pub fn make_unique_slice<T: Default>(len: usize) -> Unique<[T]> {
    Unique::from_box((0..len).map(|_| T::default()).collect::<Box<[T]>>())
}

impl<T: ?Sized, D: Deleter<T>> Unique<T, D> {
    /// An empty handle with a default deleter.
    #[inline]
    pub fn empty() -> Self
    where
        D: Default,
    {
        Self::null_with(D::default())
    }

    /// An empty handle holding the given deleter.
    #[inline]
    pub fn null_with(deleter: D) -> Self {
        Self {
            ptr: None,
            deleter,
            _marker: PhantomData,
        }
    }

    /// Take ownership of `ptr`, to be released with `deleter`.
    ///
    /// # Safety
    ///
    /// The caller must own `ptr`, it must stay valid until released, and
    /// `deleter` must be able to release it.
    #[inline]
    pub unsafe fn from_raw_with(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            ptr: Some(ptr),
            deleter,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        // Safety: the handle owns the pointee.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // Safety: the handle owns the pointee and is borrowed mutably.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }

    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    #[inline]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    #[inline]
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    /// Give up ownership without running the deleter.
    ///
    /// The handle is left empty; the caller becomes responsible for the
    /// returned pointer.
    #[inline]
    #[must_use = "the released pointer is no longer owned by anything"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Store `ptr`, then run the deleter on the previous pointer, if any.
    ///
    /// The new pointer is in place before the deleter runs, so a deleter that
    /// reaches back into this handle sees the new state.
    ///
    /// # Safety
    ///
    /// Same as [`Unique::from_raw_with`] for `ptr`, using this handle's
    /// deleter.
    pub unsafe fn reset_raw(&mut self, ptr: Option<NonNull<T>>) {
        if let Some(old) = mem::replace(&mut self.ptr, ptr) {
            // Safety: the handle owned `old`.
            unsafe { self.deleter.delete(old) }
        }
    }

    /// Release the pointee, leaving the handle empty.
    #[inline]
    pub fn reset(&mut self) {
        // Safety: `None` carries no pointer.
        unsafe { self.reset_raw(None) }
    }

    /// Move the contents out, leaving an empty handle with a fresh deleter.
    #[inline]
    pub fn take(&mut self) -> Self
    where
        D: Default,
    {
        mem::replace(self, Self::empty())
    }

    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Split into the pointer and the deleter without releasing anything.
    pub fn into_parts(self) -> (Option<NonNull<T>>, D) {
        let this = ManuallyDrop::new(self);
        // Safety: `this` is never dropped, so the deleter is moved out once.
        let deleter = unsafe { ptr::read(&this.deleter) };
        (this.ptr, deleter)
    }

    /// Move ownership into a handle of another pointee type and deleter.
    ///
    /// `cast` maps the held pointer; it is not called on an empty handle.
    /// The deleter is converted with `From`.
    ///
    /// # Safety
    ///
    /// The converted deleter must be able to release the pointer returned by
    /// `cast`.
    pub unsafe fn convert<U, E>(self, cast: impl FnOnce(NonNull<T>) -> NonNull<U>) -> Unique<U, E>
    where
        U: ?Sized,
        E: Deleter<U> + From<D>,
    {
        let (ptr, deleter) = self.into_parts();
        Unique {
            ptr: ptr.map(cast),
            deleter: E::from(deleter),
            _marker: PhantomData,
        }
    }

    fn addr(&self) -> usize {
        self.ptr.map_or(0, |ptr| ptr.as_ptr().cast::<()>() as usize)
    }
}

impl<T> Unique<T> {
    /// Box `value` and own it with the default deleter.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Unique<T> {
    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        // Safety: `Box::into_raw` output is what `DefaultDelete` releases.
        unsafe { Self::from_raw_with(NonNull::from(Box::leak(value)), DefaultDelete) }
    }

    /// Take ownership of a pointer produced by `Box::into_raw`.
    ///
    /// A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and must not be used
    /// by the caller afterwards.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter: DefaultDelete,
            _marker: PhantomData,
        }
    }

    /// Replace the pointee with a new boxed value, releasing the old one.
    pub fn replace(&mut self, value: Box<T>) {
        // Safety: `Box::into_raw` output is what `DefaultDelete` releases.
        unsafe { self.reset_raw(Some(NonNull::from(Box::leak(value)))) }
    }

    /// Hand the pointee back as a `Box`, if there is one.
    ///
    /// This is also the way to change the pointee type: unsize the box and
    /// wrap it again with [`Unique::from_box`].
    pub fn into_box(self) -> Option<Box<T>> {
        let (ptr, _) = self.into_parts();
        // Safety: pointers held with `DefaultDelete` come from `Box`.
        ptr.map(|ptr| unsafe { Box::from_raw(ptr.as_ptr()) })
    }
}

impl<T, D: Deleter<[T]>> Unique<[T], D> {
    /// Number of elements, 0 for an empty handle.
    #[inline]
    pub fn len(&self) -> usize {
        self.get().map_or(0, <[T]>::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Unique<T, D> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Unique<T, D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> From<Box<T>> for Unique<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Unique<T, D> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => empty_deref("Unique"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for Unique<T, D> {
    #[inline]
    #[track_caller]
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => empty_deref("Unique"),
        }
    }
}

impl<T, D: Deleter<[T]>> Index<usize> for Unique<[T], D> {
    type Output = T;

    #[inline]
    #[track_caller]
    fn index(&self, index: usize) -> &T {
        &(**self)[index]
    }
}

impl<T, D: Deleter<[T]>> IndexMut<usize> for Unique<[T], D> {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut (**self)[index]
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unique").field("value", &self.get()).finish()
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&(self.addr() as *const ()), f)
    }
}

// Identity comparisons, like `Shared`.

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialEq<Unique<U, E>> for Unique<T, D> {
    #[inline]
    fn eq(&self, other: &Unique<U, E>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for Unique<T, D> {}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialOrd<Unique<U, E>>
    for Unique<T, D>
{
    #[inline]
    fn partial_cmp(&self, other: &Unique<U, E>) -> Option<Ordering> {
        Some(self.addr().cmp(&other.addr()))
    }
}

impl<T: ?Sized, D: Deleter<T>> Ord for Unique<T, D> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: ?Sized, D: Deleter<T>> Hash for Unique<T, D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized, D: Deleter<T>> PartialEq<Null> for Unique<T, D> {
    #[inline]
    fn eq(&self, _: &Null) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized, D: Deleter<T>> PartialEq<Unique<T, D>> for Null {
    #[inline]
    fn eq(&self, other: &Unique<T, D>) -> bool {
        other.is_null()
    }
}

impl<T: ?Sized, D: Deleter<T>> PartialOrd<Null> for Unique<T, D> {
    #[inline]
    fn partial_cmp(&self, _: &Null) -> Option<Ordering> {
        Some(self.addr().cmp(&0))
    }
}

impl<T: ?Sized, D: Deleter<T>> PartialOrd<Unique<T, D>> for Null {
    #[inline]
    fn partial_cmp(&self, other: &Unique<T, D>) -> Option<Ordering> {
        Some(0.cmp(&other.addr()))
    }
}
