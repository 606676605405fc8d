//! Promise implementation
//!
//! A settle-once state machine with a handler list, an optional wait
//! strategy, and an optional cancel function. All handler invocation goes
//! through the promise's [`TaskQueue`]: settling a promise never runs a
//! callback inline, and neither does calling `then` on a settled promise.

mod settled;

use crate::create;
use crate::error::{messages, Error, Result};
use crate::is;
use crate::task_queue::TaskQueue;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;
use tracing::{debug, warn};

/// Fulfillment or rejection callback passed to [`Promise::then`]
pub type Callback = Box<dyn FnOnce(Value) -> Result<Value>>;

/// One-shot function that drives a promise to settlement when waited on
pub type WaitFn = Box<dyn FnOnce(&Promise) -> Result<()>>;

/// One-shot function invoked when a pending promise is cancelled
pub type CancelFn = Box<dyn FnOnce(&Promise) -> Result<()>>;

/// The state of a promise.
///
/// Once settled (Fulfilled or Rejected), a promise cannot change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    /// Neither fulfilled nor rejected yet
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

impl PromiseState {
    /// Lowercase name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered reaction: the derived promise plus its callbacks
pub(crate) struct Handler {
    promise: Promise,
    on_fulfilled: Option<Callback>,
    on_rejected: Option<Callback>,
}

struct PromiseInner {
    state: PromiseState,
    result: Value,
    handlers: Vec<Handler>,
    wait_fn: Option<WaitFn>,
    /// Upstream promises, root first; waiting on this promise waits on each
    wait_list: Vec<Promise>,
    cancel_fn: Option<CancelFn>,
    queue: TaskQueue,
}

/// How a pending promise gets driven by `wait`
enum WaitStrategy {
    Function(WaitFn),
    Upstream(Vec<Promise>),
    Missing,
}

/// A deferred value.
///
/// `Promise` is a cheap handle; clones refer to the same state.
///
/// # Examples
///
/// ```
/// use deferred::{Promise, PromiseState, TaskQueue, Value};
///
/// let queue = TaskQueue::new();
/// let promise = Promise::new(&queue);
/// let doubled = promise.and_then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0)));
///
/// promise.resolve(Value::from(21)).unwrap();
/// assert_eq!(doubled.state(), PromiseState::Pending);
///
/// queue.run();
/// assert_eq!(doubled.wait().unwrap(), Value::from(42));
/// ```
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<PromiseInner>>,
}

impl Promise {
    /// Create a pending promise with no wait or cancel function
    pub fn new(queue: &TaskQueue) -> Self {
        Self::with_fns(queue, None, None)
    }

    /// Create a pending promise that `wait` drives by calling `wait_fn` once
    pub fn with_wait<W>(queue: &TaskQueue, wait_fn: W) -> Self
    where
        W: FnOnce(&Promise) -> Result<()> + 'static,
    {
        Self::with_fns(queue, Some(Box::new(wait_fn)), None)
    }

    /// Create a pending promise that `cancel` tears down by calling `cancel_fn` once
    pub fn with_cancel<C>(queue: &TaskQueue, cancel_fn: C) -> Self
    where
        C: FnOnce(&Promise) -> Result<()> + 'static,
    {
        Self::with_fns(queue, None, Some(Box::new(cancel_fn)))
    }

    /// Create a pending promise with optional wait and cancel functions
    pub fn with_fns(queue: &TaskQueue, wait_fn: Option<WaitFn>, cancel_fn: Option<CancelFn>) -> Self {
        Self::from_parts(queue, PromiseState::Pending, Value::Null, wait_fn, cancel_fn)
    }

    fn from_parts(
        queue: &TaskQueue,
        state: PromiseState,
        result: Value,
        wait_fn: Option<WaitFn>,
        cancel_fn: Option<CancelFn>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PromiseInner {
                state,
                result,
                handlers: Vec::new(),
                wait_fn,
                wait_list: Vec::new(),
                cancel_fn,
                queue: queue.clone(),
            })),
        }
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state
    }

    /// The queue this promise schedules its handlers on
    pub fn queue(&self) -> TaskQueue {
        self.inner.borrow().queue.clone()
    }

    /// Whether two handles refer to the same promise
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }


    /// The settled value or reason; `Null` while pending
    pub(crate) fn result(&self) -> Value {
        self.inner.borrow().result.clone()
    }

    /// Follow settled-with-promise results down to the promise that decides the outcome
    fn innermost(&self) -> Promise {
        let mut current = self.clone();
        loop {
            let next = {
                let inner = current.inner.borrow();
                match (&inner.state, &inner.result) {
                    (PromiseState::Pending, _) => None,
                    (_, Value::Promise(next)) => Some(next.clone()),
                    _ => None,
                }
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Whether `target` is this promise or one its settled results lead to.
    /// Never borrows `target`.
    fn settles_through(&self, target: &Promise) -> bool {
        let mut current = self.clone();
        loop {
            if current.ptr_eq(target) {
                return true;
            }
            let next = match &current.inner.borrow().result {
                Value::Promise(next) => next.clone(),
                _ => return false,
            };
            current = next;
        }
    }

    /// Number of handlers still waiting for settlement.
    ///
    /// Observation hook: a promise resolved with a pending promise hands its
    /// handlers over, so this shows where a chain's handlers currently live.
    pub fn handler_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    /// Register callbacks and return the derived promise.
    ///
    /// The derived promise is resolved with whatever the matching callback
    /// returns, or rejected with the error it raises. A missing callback
    /// forwards the value or reason unchanged. Callbacks always run from the
    /// task queue, even when this promise is already settled.
    pub fn then(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Promise {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            PromiseState::Pending => {
                // Holds the parent; the cycle ends when either side settles
                let parent = self.clone();
                let derived = Promise::with_cancel(&inner.queue, move |_| {
                    parent.cancel();
                    Ok(())
                });
                {
                    let mut d = derived.inner.borrow_mut();
                    d.wait_list = inner.wait_list.clone();
                    d.wait_list.push(self.clone());
                }
                inner.handlers.push(Handler {
                    promise: derived.clone(),
                    on_fulfilled,
                    on_rejected,
                });
                derived
            }
            settled => {
                let result = inner.result.clone();
                let queue = inner.queue.clone();
                drop(inner);

                // Settled with a promise: the outcome is whatever that promise does
                if let Value::Promise(adopted) = result {
                    return adopted.innermost().then(on_fulfilled, on_rejected);
                }

                let callback = match settled {
                    PromiseState::Fulfilled => on_fulfilled,
                    _ => on_rejected,
                };
                match callback {
                    Some(callback) => Promise::deferred_with(&queue, result, callback),
                    None => self.clone(),
                }
            }
        }
    }

    /// Register a fulfillment callback only
    pub fn and_then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then(Some(Box::new(on_fulfilled)), None)
    }

    /// Register a rejection callback only
    pub fn otherwise<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then(None, Some(Box::new(on_rejected)))
    }

    /// Fulfill the promise.
    ///
    /// Resolving with a promise or thenable adopts its eventual outcome.
    /// Repeating the exact same resolution is a no-op; anything else on a
    /// settled promise is an [`Error::Logic`].
    pub fn resolve(&self, value: Value) -> Result<()> {
        self.settle(PromiseState::Fulfilled, value)
    }

    /// Reject the promise; same rules as [`Promise::resolve`]
    pub fn reject(&self, reason: Value) -> Result<()> {
        self.settle(PromiseState::Rejected, reason)
    }

    fn settle(&self, state: PromiseState, value: Value) -> Result<()> {
        // Foreign thenables are bridged first so every nested result is a Promise
        let value = match value {
            Value::Thenable(thenable) if is::pending(self) => {
                let queue = self.queue();
                Value::Promise(create::promise_for(&queue, Value::Thenable(thenable)))
            }
            other => other,
        };

        let mut inner = self.inner.borrow_mut();
        if inner.state != PromiseState::Pending {
            if inner.state == state && inner.result == value {
                return Ok(());
            }
            return Err(if inner.state == state {
                Error::logic(messages::already(state.as_str()))
            } else {
                Error::logic(messages::cannot_change(inner.state.as_str(), state.as_str()))
            });
        }
        if let Value::Promise(p) = &value {
            if p.settles_through(self) {
                return Err(Error::logic(messages::SETTLE_WITH_SELF));
            }
        }

        inner.state = state;
        inner.result = value.clone();
        let handlers = mem::take(&mut inner.handlers);
        let released = (
            inner.wait_fn.take(),
            mem::take(&mut inner.wait_list),
            inner.cancel_fn.take(),
        );
        let queue = inner.queue.clone();
        drop(inner);
        drop(released);

        debug!(%state, value = value.type_name(), handlers = handlers.len(), "promise settled");
        if handlers.is_empty() {
            return Ok(());
        }

        match value {
            Value::Promise(next) if is::pending(&next) => {
                // Hand our handlers to the pending promise directly so long
                // resolve-with-promise chains stay flat
                debug!(handlers = handlers.len(), "handlers forwarded to adopted promise");
                next.inner.borrow_mut().handlers.extend(handlers);
            }
            Value::Promise(next) => {
                let shared = Rc::new(RefCell::new(Some(handlers)));
                let on_rejected = shared.clone();
                next.then(
                    Some(Box::new(move |value| {
                        if let Some(handlers) = shared.borrow_mut().take() {
                            Self::call_handlers(PromiseState::Fulfilled, value, handlers);
                        }
                        Ok(Value::Null)
                    })),
                    Some(Box::new(move |reason| {
                        if let Some(handlers) = on_rejected.borrow_mut().take() {
                            Self::call_handlers(PromiseState::Rejected, reason, handlers);
                        }
                        Ok(Value::Null)
                    })),
                );
            }
            value => {
                queue.add(move || Self::call_handlers(state, value, handlers));
            }
        }
        Ok(())
    }

    fn call_handlers(state: PromiseState, value: Value, handlers: Vec<Handler>) {
        for handler in handlers {
            Self::call_handler(state, &value, handler);
        }
    }

    fn call_handler(state: PromiseState, value: &Value, handler: Handler) {
        let Handler {
            promise,
            on_fulfilled,
            on_rejected,
        } = handler;

        // The derived promise may have been cancelled or settled since this
        // handler was queued
        if !is::pending(&promise) {
            return;
        }

        let callback = match state {
            PromiseState::Fulfilled => on_fulfilled,
            _ => on_rejected,
        };
        let outcome = match callback {
            Some(callback) => callback(value.clone()).map_err(Value::from),
            None if state == PromiseState::Fulfilled => Ok(value.clone()),
            None => Err(value.clone()),
        };
        complete(&promise, outcome);
    }

    /// Block until settled and return the value.
    ///
    /// Drives the promise through its wait strategy, then drains the task
    /// queue. A rejection is raised through [`create::exception_for`].
    pub fn wait(&self) -> Result<Value> {
        let mut current = self.clone();
        loop {
            current.wait_if_pending()?;
            let (state, result) = {
                let inner = current.inner.borrow();
                (inner.state, inner.result.clone())
            };
            match result {
                Value::Promise(next) => current = next,
                value if state == PromiseState::Fulfilled => return Ok(value),
                reason => return Err(create::exception_for(reason)),
            }
        }
    }

    /// Block until settled without unwrapping.
    ///
    /// A rejection is not raised; errors only come from misbehaving wait
    /// functions.
    pub fn wait_settled(&self) -> Result<()> {
        let mut current = self.clone();
        loop {
            current.wait_if_pending()?;
            match current.result() {
                Value::Promise(next) => current = next,
                _ => return Ok(()),
            }
        }
    }

    fn wait_if_pending(&self) -> Result<()> {
        let (strategy, queue) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != PromiseState::Pending {
                return Ok(());
            }
            let strategy = if let Some(wait_fn) = inner.wait_fn.take() {
                WaitStrategy::Function(wait_fn)
            } else if !inner.wait_list.is_empty() {
                WaitStrategy::Upstream(mem::take(&mut inner.wait_list))
            } else {
                WaitStrategy::Missing
            };
            (strategy, inner.queue.clone())
        };

        match strategy {
            WaitStrategy::Function(wait_fn) => self.invoke_wait_fn(wait_fn)?,
            WaitStrategy::Upstream(list) => Self::invoke_wait_list(list)?,
            WaitStrategy::Missing => self.reject(Value::from(messages::NO_WAIT_STRATEGY))?,
        }

        queue.run();

        if is::pending(self) {
            warn!("wait strategy returned without settling the promise");
            self.reject(Value::from(messages::WAIT_DID_NOT_RESOLVE))?;
        }
        Ok(())
    }

    fn invoke_wait_fn(&self, wait_fn: WaitFn) -> Result<()> {
        match wait_fn(self) {
            Ok(()) => Ok(()),
            Err(e) if is::pending(self) => self.reject(Value::from(e)),
            // Settled and still raising: a bug in the wait function
            Err(e) => Err(e),
        }
    }

    fn invoke_wait_list(list: Vec<Promise>) -> Result<()> {
        for upstream in list {
            let mut current = upstream;
            loop {
                current.wait_if_pending()?;
                match current.result() {
                    Value::Promise(next) => current = next,
                    _ => break,
                }
            }
        }
        Ok(())
    }

    /// Cancel a pending promise.
    ///
    /// Runs the cancel function once; if the promise is still pending
    /// afterwards it is rejected with [`Error::Cancellation`]. An outcome the
    /// cancel function produced itself is kept.
    pub fn cancel(&self) {
        let (cancel_fn, released) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != PromiseState::Pending {
                return;
            }
            let released = (inner.wait_fn.take(), mem::take(&mut inner.wait_list));
            (inner.cancel_fn.take(), released)
        };

        debug!("cancelling promise");
        if let Some(cancel_fn) = cancel_fn {
            if let Err(e) = cancel_fn(self) {
                log_settle_error(self.reject(Value::from(e)));
            }
        }
        drop(released);

        if is::pending(self) {
            log_settle_error(self.reject(Value::from(Error::cancelled())));
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Promise")
                .field("state", &inner.state)
                .field("handlers", &inner.handlers.len())
                .finish(),
            Err(_) => write!(f, "Promise {{ <borrowed> }}"),
        }
    }
}

/// Settle `target` from a callback outcome, rejecting it if resolution fails
pub(crate) fn complete(target: &Promise, outcome: std::result::Result<Value, Value>) {
    let settled = match outcome {
        Ok(value) => target.resolve(value),
        Err(reason) => target.reject(reason),
    };
    if let Err(e) = settled {
        if is::pending(target) {
            log_settle_error(target.reject(Value::from(e)));
        } else {
            warn!(error = %e, "settle raised inside a queued handler");
        }
    }
}

/// Settle errors that have no caller to return to are logged
pub(crate) fn log_settle_error(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "ignored settle error");
    }
}
