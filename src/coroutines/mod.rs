//! Sequential promise composition
//!
//! A [`Coroutine`] drives a suspend/resume [`Routine`]: each time the routine
//! yields a promise-or-value, the coroutine waits for it to settle and resumes
//! the routine with the outcome. The coroutine's own promise settles with the
//! routine's final value, or rejects with the error it lets escape.
//!
//! # Example
//! ```
//! use deferred::coroutines::{Coroutine, Resume, Step};
//! use deferred::{Promise, TaskQueue, Value};
//!
//! let queue = TaskQueue::new();
//! let q = queue.clone();
//! let co = Coroutine::from_fn(&queue, move |input: Resume| match input {
//!     Resume::Start => Ok(Step::Yield(Value::Promise(Promise::fulfilled(&q, Value::from(20))?))),
//!     Resume::Value(v) => Ok(Step::Complete(Value::from(v.as_number().unwrap_or(0.0) + 1.0))),
//!     Resume::Error(e) => Err(e),
//! });
//! assert_eq!(co.wait().unwrap(), Value::from(21));
//! ```

use crate::create;
use crate::error::{Error, Result};
use crate::is;
use crate::promise::{log_settle_error, Callback, Promise, PromiseState};
use crate::task_queue::TaskQueue;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Routine
// ---------------------------------------------------------------------------

/// What a routine is resumed with
#[derive(Debug)]
pub enum Resume {
    /// First call; run up to the first suspension point
    Start,
    /// The last yielded item fulfilled with this value
    Value(Value),
    /// The last yielded item rejected; the routine may recover or return it
    Error(Error),
}

/// Where a routine stopped
#[derive(Debug)]
pub enum Step {
    /// Suspend until this promise-or-value settles
    Yield(Value),
    /// Finished with this value
    Complete(Value),
}

/// A suspend/resume body.
///
/// Returning `Err` from [`Routine::resume`] rejects the coroutine.
pub trait Routine {
    fn resume(&mut self, input: Resume) -> Result<Step>;
}

impl<F> Routine for F
where
    F: FnMut(Resume) -> Result<Step>,
{
    fn resume(&mut self, input: Resume) -> Result<Step> {
        self(input)
    }
}

// ---------------------------------------------------------------------------
// Coroutine
// ---------------------------------------------------------------------------

struct CoroutineInner {
    routine: RefCell<Box<dyn Routine>>,
    /// Derived promise tracking the item the routine is suspended on
    current: RefCell<Option<Promise>>,
    result: Promise,
    queue: TaskQueue,
}

/// A routine driven forward by the promises it yields
#[derive(Clone)]
pub struct Coroutine {
    inner: Rc<CoroutineInner>,
}

impl Coroutine {
    /// Start `routine`; it runs synchronously up to its first suspension point
    pub fn of<R>(queue: &TaskQueue, routine: R) -> Self
    where
        R: Routine + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<CoroutineInner>| {
            let weak = weak.clone();
            let result = Promise::with_wait(queue, move |_| match weak.upgrade() {
                Some(inner) => Coroutine { inner }.wait_current(),
                None => Ok(()),
            });
            CoroutineInner {
                routine: RefCell::new(Box::new(routine)),
                current: RefCell::new(None),
                result,
                queue: queue.clone(),
            }
        });

        let coroutine = Coroutine { inner };
        coroutine.drive(Resume::Start);
        coroutine
    }

    /// Start a closure routine
    pub fn from_fn<F>(queue: &TaskQueue, routine: F) -> Self
    where
        F: FnMut(Resume) -> Result<Step> + 'static,
    {
        Self::of(queue, routine)
    }

    /// The promise for the routine's final value
    pub fn promise(&self) -> Promise {
        self.inner.result.clone()
    }

    pub fn state(&self) -> PromiseState {
        self.inner.result.state()
    }

    pub fn then(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Promise {
        self.inner.result.then(on_fulfilled, on_rejected)
    }

    pub fn and_then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.inner.result.and_then(on_fulfilled)
    }

    pub fn otherwise<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.inner.result.otherwise(on_rejected)
    }

    /// Block until the routine finishes and return its value
    pub fn wait(&self) -> Result<Value> {
        self.inner.result.wait()
    }

    /// Block until the routine finishes without raising its error
    pub fn wait_settled(&self) -> Result<()> {
        self.inner.result.wait_settled()
    }

    /// Settle the coroutine from outside; the routine is not resumed again
    pub fn resolve(&self, value: Value) -> Result<()> {
        self.inner.result.resolve(value)
    }

    pub fn reject(&self, reason: Value) -> Result<()> {
        self.inner.result.reject(reason)
    }

    /// Cancel the item the routine is suspended on, then the coroutine itself
    pub fn cancel(&self) {
        let current = self.inner.current.borrow_mut().take();
        if let Some(current) = current {
            current.cancel();
        }
        self.inner.result.cancel();
    }

    fn drive(&self, input: Resume) {
        let step = self.inner.routine.borrow_mut().resume(input);
        let result = &self.inner.result;
        match step {
            Ok(Step::Yield(value)) => self.suspend_on(value),
            Ok(Step::Complete(value)) => {
                debug!(value = value.type_name(), "coroutine completed");
                if is::pending(result) {
                    log_settle_error(result.resolve(value));
                }
            }
            Err(e) => {
                debug!(error = %e, "coroutine failed");
                if is::pending(result) {
                    log_settle_error(result.reject(Value::from(e)));
                }
            }
        }
    }

    fn suspend_on(&self, yielded: Value) {
        trace!(yielded = yielded.type_name(), "coroutine suspended");
        let promise = create::promise_for(&self.inner.queue, yielded);
        let (on_fulfilled, on_rejected) = (self.clone(), self.clone());
        let next = promise.then(
            Some(Box::new(move |value| {
                on_fulfilled.handle_success(value);
                Ok(Value::Null)
            })),
            Some(Box::new(move |reason| {
                on_rejected.handle_failure(reason);
                Ok(Value::Null)
            })),
        );
        *self.inner.current.borrow_mut() = Some(next);
    }

    fn handle_success(&self, value: Value) {
        self.inner.current.borrow_mut().take();
        if is::settled(&self.inner.result) {
            return;
        }
        self.drive(Resume::Value(value));
    }

    fn handle_failure(&self, reason: Value) {
        self.inner.current.borrow_mut().take();
        if is::settled(&self.inner.result) {
            return;
        }
        self.drive(Resume::Error(create::exception_for(reason)));
    }

    /// Wait strategy of the coroutine's promise: keep waiting on whatever
    /// the routine is suspended on until it stops yielding
    fn wait_current(&self) -> Result<()> {
        loop {
            if is::settled(&self.inner.result) {
                return Ok(());
            }
            let current = self.inner.current.borrow().clone();
            let Some(current) = current else {
                return Ok(());
            };

            current.wait_settled()?;

            // Settled without handing control back to the routine
            let stalled = self
                .inner
                .current
                .borrow()
                .as_ref()
                .is_some_and(|c| c.ptr_eq(&current));
            if stalled {
                return Ok(());
            }
        }
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.inner.result.state())
            .field("suspended", &self.inner.current.borrow().is_some())
            .finish()
    }
}

impl From<Coroutine> for Value {
    fn from(coroutine: Coroutine) -> Self {
        Value::Promise(coroutine.promise())
    }
}
