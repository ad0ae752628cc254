//! Destruction policies for owned pointers.
//!
//! A [`Deleter`] decides how a pointer handed to an owning handle is released.
//! [`DefaultDelete`] rebuilds the `Box` the pointer came from, which covers
//! single objects, slices and trait objects alike. Any `FnMut(NonNull<T>)`
//! closure is also a deleter, so cleanup actions can carry state.

use std::ptr::NonNull;

/// Releases a pointer owned by a handle.
///
/// # Example
///
/// ```
/// use rc_ptr::{Deleter, Unique};
/// use std::ptr::NonNull;
///
/// struct Leak;
///
/// impl Deleter<u32> for Leak {
///     unsafe fn delete(&mut self, _ptr: NonNull<u32>) {}
/// }
///
/// static VALUE: u32 = 7;
/// let p = unsafe { Unique::from_raw_with(NonNull::from(&VALUE), Leak) };
/// assert_eq!(*p, 7);
/// ```
pub trait Deleter<T: ?Sized> {
    /// Release `ptr`.
    ///
    /// # Safety
    ///
    /// The caller must own `ptr`, it must be valid for the kind of release
    /// this deleter performs, and it must not be used afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// The default policy: the pointer was produced by `Box::into_raw`.
///
/// Zero-sized, so handles using it are the size of a pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // Safety: the pointer came from `Box::into_raw` and is owned by the
        // caller, as per pre-condition.
        unsafe { drop(Box::from_raw(ptr.as_ptr())) }
    }
}

impl<T: ?Sized, F> Deleter<T> for F
where
    F: FnMut(NonNull<T>),
{
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}
