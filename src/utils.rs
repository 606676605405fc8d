//! Promise combinators
//!
//! Collection helpers built on [`crate::each`], plus synchronous inspection
//! helpers that block through [`Promise::wait`].

use crate::each::{self, EachOptions, Sequence};
use crate::error::{messages, Error, Result};
use crate::is;
use crate::promise::{Promise, PromiseState};
use crate::task_queue::TaskQueue;
use crate::value::Value;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Snapshot of a settled promise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub state: PromiseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

impl Inspection {
    pub fn fulfilled(value: Value) -> Self {
        Self {
            state: PromiseState::Fulfilled,
            value: Some(value),
            reason: None,
        }
    }

    pub fn rejected(reason: Value) -> Self {
        Self {
            state: PromiseState::Rejected,
            value: None,
            reason: Some(reason),
        }
    }

    /// Outcome record: `{state, value}` or `{state, reason}`
    pub fn to_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("state".to_string(), Value::from(self.state.as_str()));
        if let Some(value) = &self.value {
            fields.insert("value".to_string(), value.clone());
        }
        if let Some(reason) = &self.reason {
            fields.insert("reason".to_string(), reason.clone());
        }
        Value::Object(fields)
    }
}

/// Run `f` from the queue and return a promise for its result
pub fn task<F>(queue: &TaskQueue, f: F) -> Promise
where
    F: FnOnce() -> Result<Value> + 'static,
{
    Promise::deferred(queue, f)
}

/// Wait on `promise` and describe the outcome.
///
/// Rejection reasons come back as they were given; other errors raised
/// while waiting are reported as [`Value::Error`].
pub fn inspect(promise: &Promise) -> Inspection {
    match promise.wait() {
        Ok(value) => Inspection::fulfilled(value),
        Err(Error::Rejection { reason, .. }) => Inspection::rejected(reason),
        Err(e) => Inspection::rejected(Value::from(e)),
    }
}

/// [`inspect`] every promise, in order
pub fn inspect_all<I>(promises: I) -> Vec<Inspection>
where
    I: IntoIterator<Item = Promise>,
{
    promises.into_iter().map(|p| inspect(&p)).collect()
}

/// Wait on every promise and return their values; the first rejection is raised
pub fn unwrap<I>(promises: I) -> Result<Vec<Value>>
where
    I: IntoIterator<Item = Promise>,
{
    promises.into_iter().map(|p| p.wait()).collect()
}

/// Fulfill with every item's value, in key order; reject on the first rejection.
///
/// Index-keyed sources produce an array, name-keyed ones an object.
pub fn all(queue: &TaskQueue, source: impl Into<Sequence>) -> Promise {
    let results: Rc<RefCell<Vec<_>>> = Rc::new(RefCell::new(Vec::new()));
    let collected = results.clone();
    let options = EachOptions::new()
        .on_fulfilled(move |value, key, _| {
            collected.borrow_mut().push((key, value));
            Ok(())
        })
        .on_rejected(|reason, _, aggregate| {
            if is::pending(aggregate) {
                aggregate.reject(reason)?;
            }
            Ok(())
        });

    each::of(queue, source, options).and_then(move |_| Ok(Value::from_keyed(results.take())))
}

/// Fulfill with the first `count` fulfilled values, in arrival order.
///
/// Rejects with [`Error::Aggregate`] carrying every rejection reason when the
/// source runs out first. A count of zero fulfills with an empty array.
pub fn some(queue: &TaskQueue, count: usize, source: impl Into<Sequence>) -> Promise {
    if count == 0 {
        return Promise::settled_with(queue, PromiseState::Fulfilled, Value::Array(Vec::new()));
    }

    let values = Rc::new(RefCell::new(Vec::new()));
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let (fulfilled, rejected) = (values.clone(), reasons.clone());
    let options = EachOptions::new()
        .on_fulfilled(move |value, _, aggregate| {
            if is::settled(aggregate) {
                return Ok(());
            }
            let reached = {
                let mut values = fulfilled.borrow_mut();
                values.push(value);
                values.len() >= count
            };
            if reached {
                aggregate.resolve(Value::Null)?;
            }
            Ok(())
        })
        .on_rejected(move |reason, _, _| {
            rejected.borrow_mut().push(reason);
            Ok(())
        });

    each::of(queue, source, options).and_then(move |_| {
        let values = values.take();
        if values.len() != count {
            debug!(wanted = count, got = values.len(), "not enough fulfilled");
            return Err(Error::aggregate(messages::NOT_ENOUGH_FULFILLED, reasons.take()));
        }
        Ok(Value::Array(values))
    })
}

/// Fulfill with the first fulfilled value
pub fn any(queue: &TaskQueue, source: impl Into<Sequence>) -> Promise {
    some(queue, 1, source).and_then(|values| {
        Ok(values
            .as_array()
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default())
    })
}

/// Wait for every item and fulfill with their outcome records, in key order.
///
/// Never rejects.
pub fn settle(queue: &TaskQueue, source: impl Into<Sequence>) -> Promise {
    let results: Rc<RefCell<Vec<_>>> = Rc::new(RefCell::new(Vec::new()));
    let (fulfilled, rejected) = (results.clone(), results.clone());
    let options = EachOptions::new()
        .on_fulfilled(move |value, key, _| {
            fulfilled
                .borrow_mut()
                .push((key, Inspection::fulfilled(value).to_value()));
            Ok(())
        })
        .on_rejected(move |reason, key, _| {
            rejected
                .borrow_mut()
                .push((key, Inspection::rejected(reason).to_value()));
            Ok(())
        });

    each::of(queue, source, options).and_then(move |_| Ok(Value::from_keyed(results.take())))
}
