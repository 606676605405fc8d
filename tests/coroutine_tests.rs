//! Integration tests for coroutines

mod common;
use common::{fulfilled, rejected, Log};
use deferred::coroutines::{Coroutine, Resume, Routine, Step};
use deferred::{is, utils, Error, Promise, PromiseState, Result, TaskQueue, Value};
use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::rc::Rc;

/// Yields three tasks in sequence, each computed from the previous value
struct Pipeline {
    queue: TaskQueue,
    log: Log,
    stage: usize,
}

impl Routine for Pipeline {
    fn resume(&mut self, input: Resume) -> Result<Step> {
        let previous = match input {
            Resume::Start => 0.0,
            Resume::Value(v) => v.as_number().unwrap_or(0.0),
            Resume::Error(e) => return Err(e),
        };
        if self.stage == 3 {
            return Ok(Step::Complete(Value::from(previous * 100.0)));
        }

        self.stage += 1;
        // Nothing from this stage may have run before the previous one settled
        assert_eq!(self.log.len(), self.stage - 1);

        let (log, stage) = (self.log.clone(), self.stage);
        let next = utils::task(&self.queue, move || {
            log.push(stage);
            Ok(Value::from(previous + 1.0))
        });
        Ok(Step::Yield(Value::Promise(next)))
    }
}

#[test]
fn test_yields_run_sequentially() {
    let queue = TaskQueue::new();
    let log = Log::default();
    let co = Coroutine::of(
        &queue,
        Pipeline {
            queue: queue.clone(),
            log: log.clone(),
            stage: 0,
        },
    );

    assert_eq!(co.wait().unwrap(), Value::from(300));
    assert_eq!(log.entries(), vec![Value::from(1), Value::from(2), Value::from(3)]);
}

#[test]
fn test_progresses_when_queue_drains() {
    let queue = TaskQueue::new();
    let log = Log::default();
    let co = Coroutine::of(
        &queue,
        Pipeline {
            queue: queue.clone(),
            log: log.clone(),
            stage: 0,
        },
    );
    assert_eq!(co.state(), PromiseState::Pending);

    queue.run();
    assert_eq!(co.state(), PromiseState::Fulfilled);
    assert_eq!(log.len(), 3);
}

#[test]
fn test_failure_is_delivered_to_routine() {
    let queue = TaskQueue::new();
    let q = queue.clone();
    let mut attempts = 0;
    let co = Coroutine::from_fn(&queue, move |input: Resume| {
        match input {
            Resume::Start => {}
            Resume::Value(v) => return Ok(Step::Complete(v)),
            Resume::Error(e) => {
                assert_eq!(e.reason(), Some(&Value::from("flaky")));
            }
        }
        attempts += 1;
        let next = if attempts < 3 {
            rejected(&q, "flaky")
        } else {
            fulfilled(&q, format!("attempt {}", attempts))
        };
        Ok(Step::Yield(Value::Promise(next)))
    });

    assert_eq!(co.wait().unwrap(), Value::from("attempt 3"));
}

#[test]
fn test_escaping_error_rejects_coroutine() {
    let queue = TaskQueue::new();
    let q = queue.clone();
    let co = Coroutine::from_fn(&queue, move |input: Resume| match input {
        Resume::Start => Ok(Step::Yield(Value::Promise(rejected(&q, "unhandled")))),
        Resume::Error(e) => Err(e),
        Resume::Value(_) => Ok(Step::Complete(Value::Null)),
    });

    let caught = co.otherwise(|reason| Ok(Value::from(format!("caught: {}", reason))));
    assert_eq!(
        caught.wait().unwrap(),
        Value::from("caught: The promise was rejected with reason: unhandled")
    );
}

#[test]
fn test_routine_error_on_start() {
    let queue = TaskQueue::new();
    let co = Coroutine::from_fn(&queue, |_: Resume| Err(Error::failure("no start")));
    assert!(is::rejected(&co.promise()));
    assert!(co.wait_settled().is_ok());
    assert!(matches!(co.wait(), Err(Error::Failure(ref m)) if m == "no start"));
}

#[test]
fn test_nested_coroutine() {
    let queue = TaskQueue::new();
    let q = queue.clone();
    let co = Coroutine::from_fn(&queue, move |input: Resume| match input {
        Resume::Start => {
            let inner_queue = q.clone();
            let inner = Coroutine::from_fn(&q, move |input: Resume| match input {
                Resume::Start => Ok(Step::Yield(Value::Promise(fulfilled(&inner_queue, "inner")))),
                Resume::Value(v) => Ok(Step::Complete(v)),
                Resume::Error(e) => Err(e),
            });
            Ok(Step::Yield(Value::from(inner)))
        }
        Resume::Value(v) => Ok(Step::Complete(Value::from(format!("outer({})", v)))),
        Resume::Error(e) => Err(e),
    });
    assert_eq!(co.wait().unwrap(), Value::from("outer(inner)"));
}

#[test]
fn test_cancel_while_suspended() {
    let queue = TaskQueue::new();
    let awaited = Promise::new(&queue);
    let a = awaited.clone();
    let co = Coroutine::from_fn(&queue, move |input: Resume| match input {
        Resume::Start => Ok(Step::Yield(Value::Promise(a.clone()))),
        _ => Ok(Step::Complete(Value::from("resumed"))),
    });

    co.cancel();
    assert!(is::rejected(&awaited));
    assert!(co.wait().unwrap_err().is_cancellation());
}

#[test]
fn test_cancel_reaches_yielded_promise_not_kept() {
    let queue = TaskQueue::new();
    let q = queue.clone();
    let cancelled = Rc::new(Cell::new(false));
    let c = cancelled.clone();
    let co = Coroutine::from_fn(&queue, move |input: Resume| match input {
        Resume::Start => {
            let flag = c.clone();
            let awaited = Promise::with_cancel(&q, move |_| {
                flag.set(true);
                Ok(())
            });
            Ok(Step::Yield(Value::Promise(awaited)))
        }
        _ => Ok(Step::Complete(Value::from("resumed"))),
    });

    co.cancel();
    queue.run();
    assert!(cancelled.get());
    assert!(co.wait().unwrap_err().is_cancellation());
}

#[test]
fn test_then_on_coroutine() {
    let queue = TaskQueue::new();
    let co = Coroutine::from_fn(&queue, |input: Resume| match input {
        Resume::Start => Ok(Step::Yield(Value::from(20))),
        Resume::Value(v) => Ok(Step::Complete(Value::from(v.as_number().unwrap_or(0.0) + 1.0))),
        Resume::Error(e) => Err(e),
    });
    let doubled = co.and_then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0)));
    assert_eq!(doubled.wait().unwrap(), Value::from(42));
}
