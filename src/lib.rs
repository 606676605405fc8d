//! Deferred: cooperative, single-threaded promises
//!
//! Deferred is a promise library for synchronous hosts. Promises settle once,
//! notify their handlers through an explicitly owned [`TaskQueue`], and can
//! be driven to completion by blocking on [`Promise::wait`]. There are no
//! threads and no ambient event loop: work only happens when the queue is
//! drained.
//!
//! # Quick Start
//!
//! ```
//! use deferred::{utils, Promise, TaskQueue, Value};
//!
//! fn main() -> deferred::Result<()> {
//!     let queue = TaskQueue::new();
//!     let slow = Promise::with_wait(&queue, |p| p.resolve(Value::from("slow")));
//!     let fast = Promise::fulfilled(&queue, Value::from("fast"))?;
//!
//!     let both = utils::all(&queue, vec![slow, fast]);
//!     assert_eq!(
//!         both.wait()?,
//!         Value::Array(vec![Value::from("slow"), Value::from("fast")])
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`promise`], [`task_queue`], [`value`], [`error`](Error) |
//! | **Helpers** | [`create`], [`is`], [`utils`] |
//! | **Composition** | [`each`], [`coroutines`] |
// Clippy configuration.
//
// - type_complexity: callback slots are boxed closures over dynamic values
#![allow(clippy::type_complexity)]

pub mod coroutines;
pub mod create;
pub mod each;
pub mod is;
pub mod prelude;
pub mod promise;
pub mod task_queue;
pub mod utils;
pub mod value;

mod error;

pub use coroutines::{Coroutine, Resume, Routine, Step};
pub use each::{Concurrency, EachOptions, EachPromise, Sequence};
pub use error::{messages, Error, Result};
pub use promise::{Callback, CancelFn, Promise, PromiseState, WaitFn};
pub use task_queue::{DrainGuard, QueueStats, Task, TaskQueue};
pub use value::{Key, Settler, Thenable, Value};

/// Deferred version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
