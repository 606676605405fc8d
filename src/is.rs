//! State predicates

use crate::promise::{Promise, PromiseState};
use crate::value::Value;

/// Not settled yet
pub fn pending(promise: &Promise) -> bool {
    promise.state() == PromiseState::Pending
}

/// Fulfilled or rejected
pub fn settled(promise: &Promise) -> bool {
    promise.state() != PromiseState::Pending
}

/// Fulfilled
pub fn fulfilled(promise: &Promise) -> bool {
    promise.state() == PromiseState::Fulfilled
}

/// Rejected
pub fn rejected(promise: &Promise) -> bool {
    promise.state() == PromiseState::Rejected
}

/// Whether the value exposes a `then` capability (a promise or a foreign thenable)
pub fn thenable(value: &Value) -> bool {
    matches!(value, Value::Promise(_) | Value::Thenable(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::TaskQueue;

    #[test]
    fn test_state_predicates() {
        let queue = TaskQueue::new();
        let p = Promise::new(&queue);
        assert!(pending(&p) && !settled(&p));

        p.resolve(Value::Null).unwrap();
        assert!(settled(&p) && fulfilled(&p) && !rejected(&p));

        let r = Promise::rejected(&queue, Value::Null).unwrap();
        assert!(rejected(&r) && !fulfilled(&r));
    }

    #[test]
    fn test_thenable() {
        let queue = TaskQueue::new();
        assert!(thenable(&Value::Promise(Promise::new(&queue))));
        assert!(!thenable(&Value::from("then")));
    }
}
