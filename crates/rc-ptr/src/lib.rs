//! # rc-ptr
//!
//! Reference-counted and exclusive-ownership smart pointers with explicit
//! control blocks.
//!
//! Modeled on the shared/weak/unique pointer family: a [`Shared`] handle is
//! an (address, control block) pair, so it can point at a field or a trait
//! object view of what it owns, and a [`Unique`] handle releases its pointee
//! through a pluggable [`Deleter`].
//!
//! ## Features
//!
//! - **Combined allocation**: [`make_shared`] places the value inside its control block
//! - **Custom deleters**: closures or [`Deleter`] types release what a handle owns
//! - **Aliasing**: share ownership of an object while pointing at a part of it
//! - **Weak references**: non-owning references for cycle prevention
//! - **Casts**: static, dynamic (via [`AsAny`]) and reinterpreting casts between handles
//! - **Generic thread-safety**: `SingleThreaded` or `ThreadSafe` via `AtomicPolicy` trait
//!
//! ## Quick Start
//!
//! ```rust
//! use rc_ptr::{make_shared, make_unique, Shared};
//!
//! let p: Shared<i32> = make_shared(42);
//! let q = p.clone();
//! assert_eq!(p.use_count(), 2);
//!
//! let weak = q.downgrade();
//! drop((p, q));
//! assert!(weak.expired()); // Destroyed when the last strong handle goes
//!
//! let owned = make_unique(String::from("hello"));
//! let shared: Shared<String> = Shared::from(owned);
//! assert_eq!(*shared, "hello");
//! ```

mod cast;
mod control;
mod deleter;
mod error;
mod policy;
mod shared;
mod unique;
mod weak;

pub use cast::{const_pointer_cast, dynamic_pointer_cast, static_pointer_cast, AsAny};
pub use deleter::{DefaultDelete, Deleter};
pub use error::{Error, Result};
pub use policy::{AtomicPolicy, Counter, Shareable, SingleThreaded, ThreadSafe};
pub use shared::{make_shared, make_shared_with, LocalShared, Shared, SharedPtr};
pub use unique::{make_unique, make_unique_slice, Null, Unique};
pub use weak::{LocalWeak, Weak, WeakPtr};
