//! # lazy_coro
//!
//! Lazy, single-owner suspension primitives built on Rust futures:
//!
//! * [`Task`]: a lazily started asynchronous result with one continuation
//! * [`Generator`]: a lazy, pull based, single pass value sequence
//! * [`RecursiveGenerator`]: a generator that splices nested generators
//!   into its own sequence without growing the native stack per level
//!
//! None of them runs its body until it is first driven, and dropping a
//! handle whose body has not finished cancels it.
//!
//! ```
//! use lazy_coro::Gn;
//!
//! let g = Gn::new_scoped(|mut s| async move {
//!     for i in 0..3 {
//!         s.yield_(i).await;
//!     }
//! });
//! assert_eq!(g.collect::<Vec<_>>(), vec![0, 1, 2]);
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod failure;
mod gen_impl;
mod recursive;
mod rt;
mod scope;
mod task;

pub use crate::failure::{Failure, FailurePolicy, Propagate, Terminate};
pub use crate::gen_impl::{fmap, Cursor, Generator, Gn};
pub use crate::recursive::{RecCursor, RecScope, RecursiveGenerator, YieldFrom};
pub use crate::rt::Error;
pub use crate::scope::{Scope, Yield};
pub use crate::task::{make_task, Get, Task, WhenReady};
