//! Pre-settled promises and deferred callback invocation

use super::{complete, Callback, Promise, PromiseState};
use crate::error::{messages, Error, Result};
use crate::is;
use crate::task_queue::TaskQueue;
use crate::value::Value;

impl Promise {
    /// Create an already fulfilled promise.
    ///
    /// Fails with [`Error::InvalidArgument`] for promise or thenable values,
    /// which would make "already fulfilled" ambiguous; use
    /// [`crate::create::promise_for`] for those.
    pub fn fulfilled(queue: &TaskQueue, value: Value) -> Result<Promise> {
        if is::thenable(&value) {
            return Err(Error::invalid_argument(messages::FULFILLED_WITH_THENABLE));
        }
        Ok(Self::settled_with(queue, PromiseState::Fulfilled, value))
    }

    /// Create an already rejected promise; fails for promise or thenable reasons
    pub fn rejected(queue: &TaskQueue, reason: Value) -> Result<Promise> {
        if is::thenable(&reason) {
            return Err(Error::invalid_argument(messages::REJECTED_WITH_THENABLE));
        }
        Ok(Self::settled_with(queue, PromiseState::Rejected, reason))
    }

    pub(crate) fn settled_with(queue: &TaskQueue, state: PromiseState, value: Value) -> Promise {
        Self::from_parts(queue, state, value, None, None)
    }

    /// Run `f` from the queue and settle the returned promise with its result.
    ///
    /// Waiting on the returned promise drains the queue. If the promise was
    /// settled or cancelled before the task runs, `f` is never called.
    pub(crate) fn deferred<F>(queue: &TaskQueue, f: F) -> Promise
    where
        F: FnOnce() -> Result<Value> + 'static,
    {
        let drain = queue.clone();
        let promise = Promise::with_wait(queue, move |_| {
            drain.run();
            Ok(())
        });

        let target = promise.clone();
        queue.add(move || {
            if is::pending(&target) {
                complete(&target, f().map_err(Value::from));
            }
        });
        promise
    }

    /// Invoke a then-callback on an already settled value from the queue
    pub(crate) fn deferred_with(queue: &TaskQueue, value: Value, callback: Callback) -> Promise {
        Self::deferred(queue, move || callback(value))
    }
}
