//! Promise factories
//!
//! Normalize arbitrary values into promises, rejections, errors, and item
//! sequences.

use crate::each::Sequence;
use crate::error::{Error, Result};
use crate::promise::{log_settle_error, CancelFn, Promise, PromiseState, WaitFn};
use crate::task_queue::TaskQueue;
use crate::value::Value;
use tracing::debug;

/// Turn any value into a promise.
///
/// Promises are returned unchanged. A foreign thenable is bridged: the new
/// promise settles when the thenable calls back, and its wait and cancel
/// delegate to the thenable's own when it offers them. Anything else becomes
/// an already fulfilled promise.
pub fn promise_for(queue: &TaskQueue, value: Value) -> Promise {
    match value {
        Value::Promise(promise) => promise,
        Value::Thenable(thenable) => {
            let wait_fn: Option<WaitFn> = if thenable.can_wait() {
                let waiter = thenable.clone();
                Some(Box::new(move |_| waiter.wait()))
            } else {
                None
            };
            let cancel_fn: Option<CancelFn> = if thenable.can_cancel() {
                let canceller = thenable.clone();
                Some(Box::new(move |_| {
                    canceller.cancel();
                    Ok(())
                }))
            } else {
                None
            };

            debug!(
                wait = wait_fn.is_some(),
                cancel = cancel_fn.is_some(),
                "bridging foreign thenable"
            );
            let bridge = Promise::with_fns(queue, wait_fn, cancel_fn);
            let (on_fulfilled, on_rejected) = (bridge.clone(), bridge.clone());
            thenable.then(
                Box::new(move |value| log_settle_error(on_fulfilled.resolve(value))),
                Box::new(move |reason| log_settle_error(on_rejected.reject(reason))),
            );
            bridge
        }
        value => Promise::settled_with(queue, PromiseState::Fulfilled, value),
    }
}

/// Turn a reason into a rejected promise.
///
/// Promises are returned unchanged; a foreign thenable is an
/// [`Error::InvalidArgument`].
pub fn rejection_for(queue: &TaskQueue, reason: Value) -> Result<Promise> {
    match reason {
        Value::Promise(promise) => Ok(promise),
        reason => Promise::rejected(queue, reason),
    }
}

/// Turn a rejection reason into a raisable error.
///
/// Error values are returned as they are; anything else is wrapped in an
/// [`Error::Rejection`] that keeps the original reason.
pub fn exception_for(reason: Value) -> Error {
    match reason {
        Value::Error(e) => (*e).clone(),
        reason => Error::rejection(reason),
    }
}

/// Normalize a value into a lazy item sequence.
///
/// Arrays yield their elements keyed by index, objects their fields keyed by
/// name, and any other value is a single item at index 0.
pub fn iterator_for(value: Value) -> Sequence {
    match value {
        Value::Array(items) => Sequence::lazy(items),
        Value::Object(fields) => Sequence::keyed(fields.into_iter().map(|(name, v)| (name.into(), v))),
        value => Sequence::once(value),
    }
}
