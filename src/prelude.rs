//! Prelude module for convenient imports
//!
//! ```
//! use deferred::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let queue = TaskQueue::new();
//!     let promise = Promise::new(&queue);
//!     promise.resolve(Value::from(1))?;
//!     assert!(is::fulfilled(&promise));
//!     Ok(())
//! }
//! ```

// Core types
pub use crate::promise::{Promise, PromiseState};
pub use crate::task_queue::TaskQueue;
pub use crate::value::{Key, Thenable, Value};

// Error handling
pub use crate::error::{Error, Result};

// Helpers
pub use crate::{create, is, utils};

// Composition
pub use crate::coroutines::{Coroutine, Resume, Step};
pub use crate::each::{Concurrency, EachOptions, EachPromise, Sequence};
