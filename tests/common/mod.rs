//! Shared test helpers for integration tests

use deferred::{Promise, Settler, TaskQueue, Thenable, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// An already fulfilled promise
pub fn fulfilled(queue: &TaskQueue, value: impl Into<Value>) -> Promise {
    Promise::fulfilled(queue, value.into()).expect("plain value")
}

/// An already rejected promise
#[allow(dead_code)]
pub fn rejected(queue: &TaskQueue, reason: impl Into<Value>) -> Promise {
    Promise::rejected(queue, reason.into()).expect("plain reason")
}

/// A pending promise that resolves with `value` only once waited on
#[allow(dead_code)]
pub fn lazy(queue: &TaskQueue, value: impl Into<Value>) -> Promise {
    let value = value.into();
    Promise::with_wait(queue, move |p| p.resolve(value))
}

/// Ordered side-effect log shared between callbacks
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Log(Rc<RefCell<Vec<Value>>>);

#[allow(dead_code)]
impl Log {
    pub fn push(&self, entry: impl Into<Value>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// Foreign thenable whose outcome is fired by hand
#[derive(Default)]
#[allow(dead_code)]
pub struct Manual {
    settlers: RefCell<Option<(Settler, Settler)>>,
}

#[allow(dead_code)]
impl Manual {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn fulfill(&self, value: impl Into<Value>) {
        if let Some((on_fulfilled, _)) = self.settlers.borrow_mut().take() {
            on_fulfilled(value.into());
        }
    }

    pub fn reject(&self, reason: impl Into<Value>) {
        if let Some((_, on_rejected)) = self.settlers.borrow_mut().take() {
            on_rejected(reason.into());
        }
    }
}

/// Handle type so tests can keep firing after the value is handed over
#[allow(dead_code)]
pub struct ManualHandle(pub Rc<Manual>);

impl Thenable for ManualHandle {
    fn then(&self, on_fulfilled: Settler, on_rejected: Settler) {
        *self.0.settlers.borrow_mut() = Some((on_fulfilled, on_rejected));
    }
}
