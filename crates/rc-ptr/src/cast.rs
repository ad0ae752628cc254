//! Pointer casts between shared handles.
//!
//! All three casts return a handle that shares ownership with the source:
//! the strong count goes up by one on success, and the owned object is
//! destroyed through its original type whatever the result points at.
//!
//! | cast                    | checked       | fails with      |
//! |-------------------------|---------------|-----------------|
//! | [`static_pointer_cast`] | compile time  | -               |
//! | [`dynamic_pointer_cast`]| run time      | empty handle    |
//! | [`const_pointer_cast`]  | caller        | -               |

use std::any::Any;

use crate::policy::AtomicPolicy;
use crate::shared::SharedPtr;

/// Runtime type access for the pointee of a dynamic cast.
///
/// Implemented for every `'static` sized type. A trait that should support
/// downcasting can list it as a supertrait:
///
/// ```
/// use rc_ptr::{dynamic_pointer_cast, AsAny, Shared};
///
/// trait Animal: AsAny {
///     fn name(&self) -> &str;
/// }
///
/// struct Dog;
///
/// impl Animal for Dog {
///     fn name(&self) -> &str {
///         "dog"
///     }
/// }
///
/// let animal: Shared<dyn Animal + Send + Sync> = Shared::from_box(Box::new(Dog));
/// let dog = dynamic_pointer_cast::<Dog, _, _>(&animal);
/// assert!(!dog.is_null());
/// assert_eq!(animal.use_count(), 2);
///
/// let not_a_string = dynamic_pointer_cast::<String, _, _>(&animal);
/// assert!(not_a_string.is_null());
/// ```
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AsAny for dyn Any {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AsAny for dyn Any + Send {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl AsAny for dyn Any + Send + Sync {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Convert to a view that is known to be valid at compile time.
///
/// `view` picks what the new handle points at: a trait object, a field, a
/// wrapped inner value. Equivalent to [`SharedPtr::map`].
///
/// ```
/// use rc_ptr::{static_pointer_cast, Shared};
/// use std::fmt::Display;
///
/// let number = Shared::new(7u8);
/// let display: Shared<dyn Display + Send + Sync> =
///     static_pointer_cast(&number, |n| n as &(dyn Display + Send + Sync + 'static));
/// assert_eq!(display.to_string(), "7");
/// ```
#[inline]
pub fn static_pointer_cast<U, T, P>(ptr: &SharedPtr<T, P>, view: impl FnOnce(&T) -> &U) -> SharedPtr<U, P>
where
    U: ?Sized,
    T: ?Sized,
    P: AtomicPolicy,
{
    ptr.map(view)
}

/// Convert to a concrete type after checking it at run time.
///
/// Returns an empty handle, without touching any count, when the pointee is
/// not a `U` (or when `ptr` is empty).
#[inline]
pub fn dynamic_pointer_cast<U, T, P>(ptr: &SharedPtr<T, P>) -> SharedPtr<U, P>
where
    U: Any,
    T: ?Sized + AsAny,
    P: AtomicPolicy,
{
    ptr.try_map(|value| AsAny::as_any(value).downcast_ref::<U>())
}

/// Reinterpret the pointee as another type.
///
/// Moves between `#[repr(transparent)]` wrappers and other types with an
/// identical layout. The result shares ownership with `ptr`.
///
/// # Safety
///
/// `T` and `U` must be layout compatible, and every value `ptr` may point at
/// must be a valid `U`. Interior mutability rules of `T` still apply.
pub unsafe fn const_pointer_cast<U, T, P>(ptr: &SharedPtr<T, P>) -> SharedPtr<U, P>
where
    P: AtomicPolicy,
{
    match ptr.as_ptr() {
        // Safety: as per pre-condition; `ptr` keeps the pointee alive.
        Some(raw) => unsafe { SharedPtr::aliasing(ptr, raw.cast::<U>()) },
        None => SharedPtr::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{LocalShared, Shared};
    use std::cell::Cell;
    use std::rc::Rc;

    trait Shape: AsAny {
        fn area(&self) -> u32;
    }

    #[derive(Debug)]
    struct Square(u32);

    impl Shape for Square {
        fn area(&self) -> u32 {
            self.0 * self.0
        }
    }

    struct Circle;

    impl Shape for Circle {
        fn area(&self) -> u32 {
            3
        }
    }

    #[test]
    fn test_static_cast_to_trait_object() {
        let square = Shared::new(Square(3));
        let shape: Shared<dyn Shape + Send + Sync> =
            static_pointer_cast(&square, |s| s as &(dyn Shape + Send + Sync + 'static));

        assert_eq!(shape.area(), 9);
        assert_eq!(square.use_count(), 2);
        assert!(shape.ptr_eq(&square));
    }

    #[test]
    fn test_dynamic_cast_success_and_failure() {
        let shape: LocalShared<dyn Shape> = LocalShared::from_box(Box::new(Square(2)));

        let square = dynamic_pointer_cast::<Square, _, _>(&shape);
        assert_eq!(square.0, 2);
        assert_eq!(shape.use_count(), 2);

        let circle = dynamic_pointer_cast::<Circle, _, _>(&shape);
        assert!(circle.is_null());
        assert_eq!(circle.use_count(), 0);
        assert_eq!(shape.use_count(), 2);
    }

    #[test]
    fn test_dynamic_cast_on_empty() {
        let shape: LocalShared<dyn Shape> = LocalShared::empty();
        let square = dynamic_pointer_cast::<Square, _, _>(&shape);
        assert!(square.is_null());
    }

    #[test]
    fn test_dynamic_cast_from_any() {
        let any: Shared<dyn Any + Send + Sync> = Shared::from_box(Box::new(5u16));
        assert_eq!(*dynamic_pointer_cast::<u16, _, _>(&any), 5);
        assert!(dynamic_pointer_cast::<u32, _, _>(&any).is_null());
    }

    #[test]
    fn test_cast_result_keeps_original_alive() {
        struct Tracked(Rc<Cell<u32>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        impl Shape for Tracked {
            fn area(&self) -> u32 {
                0
            }
        }

        let drops = Rc::new(Cell::new(0));
        let shape: LocalShared<dyn Shape> =
            LocalShared::from_box(Box::new(Tracked(drops.clone())));
        let concrete = dynamic_pointer_cast::<Tracked, _, _>(&shape);
        drop(shape);
        assert_eq!(drops.get(), 0);
        drop(concrete);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_const_cast_transparent_wrapper() {
        #[repr(transparent)]
        struct Meters(u32);

        let raw = Shared::new(12u32);
        let meters: Shared<Meters> = unsafe { const_pointer_cast(&raw) };
        assert_eq!(meters.0, 12);
        assert_eq!(raw.use_count(), 2);
        assert!(meters.ptr_eq(&raw));
    }
}
