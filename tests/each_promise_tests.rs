//! Integration tests for bounded-concurrency iteration

mod common;
use common::{fulfilled, lazy, rejected, Log};
use deferred::each::{self, Concurrency, EachOptions, EachPromise, Sequence};
use deferred::{is, Error, Key, Promise, PromiseState, TaskQueue, Value};
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Options whose fulfilled callback records the value and the in-flight
/// count observed at that moment
fn observing(
    slot: &Rc<RefCell<Option<EachPromise>>>,
    log: &Log,
    peak: &Rc<Cell<usize>>,
) -> EachOptions {
    let (slot, log, peak) = (slot.clone(), log.clone(), peak.clone());
    EachOptions::new().on_fulfilled(move |value, _, _| {
        log.push(value);
        if let Some(each) = slot.borrow().as_ref() {
            peak.set(peak.get().max(each.pending_len()));
        }
        Ok(())
    })
}

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_limit_two_over_five_fulfilled_items() {
        let queue = TaskQueue::new();
        let slot = Rc::new(RefCell::new(None));
        let log = Log::default();
        let peak = Rc::new(Cell::new(0));

        let source: Vec<Promise> = (0..5).map(|i| fulfilled(&queue, i)).collect();
        let each = EachPromise::new(&queue, source, observing(&slot, &log, &peak).limit(2));
        *slot.borrow_mut() = Some(each.clone());

        let aggregate = each.promise();
        assert_eq!(each.pending_len(), 2);

        aggregate.wait().unwrap();
        assert_eq!(log.len(), 5);
        assert!(peak.get() <= 2);
        assert_eq!(aggregate.state(), PromiseState::Fulfilled);
    }

    #[test]
    fn test_unbounded_attaches_all_at_once() {
        let queue = TaskQueue::new();
        let each = EachPromise::new(
            &queue,
            (0..6).map(|_| Promise::new(&queue)).collect::<Vec<_>>(),
            EachOptions::new(),
        );
        each.promise();
        assert_eq!(each.pending_len(), 6);
    }

    #[test]
    fn test_dynamic_limit_follows_in_flight_count() {
        let queue = TaskQueue::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let c = calls.clone();
        let limit = Concurrency::dynamic(move |in_flight| {
            c.borrow_mut().push(in_flight);
            2
        });

        let items: Vec<Promise> = (0..4).map(|_| Promise::new(&queue)).collect();
        let each = EachPromise::new(&queue, items.clone(), EachOptions::new().concurrency(limit));
        each.promise();
        assert_eq!(*calls.borrow(), vec![0]);
        assert_eq!(each.pending_len(), 2);

        items[1].resolve(Value::Null).unwrap();
        queue.run();
        assert_eq!(*calls.borrow(), vec![0, 1]);
        assert_eq!(each.pending_len(), 2);
    }

    #[test]
    fn test_infinite_source_stopped_by_callback() {
        let queue = TaskQueue::new();
        let q = queue.clone();
        let source = Sequence::lazy((0..).map(move |i: i64| Value::Promise(fulfilled(&q, i))));

        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let aggregate = each::of_limit(
            &queue,
            source,
            Concurrency::Fixed(3),
            EachOptions::new().on_fulfilled(move |_, _, aggregate| {
                s.set(s.get() + 1);
                if s.get() == 10 {
                    aggregate.resolve(Value::from("enough"))?;
                }
                Ok(())
            }),
        );

        assert_eq!(aggregate.wait().unwrap(), Value::from("enough"));
        assert!(seen.get() >= 10);
    }
}

mod callbacks {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejected_callback_receives_reason_and_key() {
        let queue = TaskQueue::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let source = Sequence::keyed(vec![
            (Key::from("ok"), Value::Promise(fulfilled(&queue, 1))),
            (Key::from("bad"), Value::Promise(rejected(&queue, "why"))),
        ]);

        let aggregate = each::of(
            &queue,
            source,
            EachOptions::new().on_rejected(move |reason, key, _| {
                s.borrow_mut().push((key, reason));
                Ok(())
            }),
        );
        aggregate.wait().unwrap();
        assert_eq!(*seen.borrow(), vec![(Key::from("bad"), Value::from("why"))]);
    }

    #[test]
    fn test_plain_values_are_wrapped() {
        let queue = TaskQueue::new();
        let log = Log::default();
        let l = log.clone();
        each::of(
            &queue,
            Value::Array(vec![Value::from("a"), Value::from("b")]),
            EachOptions::new().on_fulfilled(move |value, _, _| {
                l.push(value);
                Ok(())
            }),
        )
        .wait()
        .unwrap();
        assert_eq!(log.entries(), vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_callback_error_rejects_aggregate() {
        let queue = TaskQueue::new();
        let aggregate = each::of(
            &queue,
            vec![Value::from(1), Value::from(2)],
            EachOptions::new().on_fulfilled(|_, _, _| Err(Error::failure("callback broke"))),
        );
        let err = aggregate.wait().unwrap_err();
        assert!(matches!(err, Error::Failure(ref m) if m == "callback broke"));
    }

    #[test]
    fn test_of_limit_all_rejects_with_first_reason() {
        let queue = TaskQueue::new();
        let source = vec![
            Value::Promise(rejected(&queue, "first")),
            Value::Promise(rejected(&queue, "second")),
        ];
        let aggregate = each::of_limit_all(&queue, source, Concurrency::Unbounded, EachOptions::new());
        assert_eq!(aggregate.wait().unwrap_err().reason(), Some(&Value::from("first")));
    }
}

mod lifecycle {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_source_fulfills_without_waiting() {
        let queue = TaskQueue::new();
        let aggregate = each::of(&queue, Vec::<Value>::new(), EachOptions::new());
        assert!(is::fulfilled(&aggregate));
        assert_eq!(aggregate.wait().unwrap(), Value::Null);
    }

    #[test]
    fn test_aggregate_wait_drives_lazy_items() {
        let queue = TaskQueue::new();
        let log = Log::default();
        let l = log.clone();
        let items = vec![lazy(&queue, 1), lazy(&queue, 2), lazy(&queue, 3)];
        let aggregate = each::of_limit(
            &queue,
            items,
            Concurrency::Fixed(2),
            EachOptions::new().on_fulfilled(move |value, _, _| {
                l.push(value);
                Ok(())
            }),
        );
        aggregate.wait().unwrap();
        assert_eq!(log.entries(), vec![Value::from(1), Value::from(2), Value::from(3)]);
    }

    #[test]
    fn test_external_settle_releases_state() {
        let queue = TaskQueue::new();
        let each = EachPromise::new(&queue, vec![Promise::new(&queue)], EachOptions::new());
        let aggregate = each.promise();
        aggregate.reject(Value::from("stop")).unwrap();
        queue.run();
        assert_eq!(each.pending_len(), 0);
        assert!(each.promise().ptr_eq(&aggregate));
    }

    #[test]
    fn test_zero_limit_never_finishes_on_its_own() {
        let queue = TaskQueue::new();
        let aggregate = each::of_limit(&queue, vec![Value::from(1)], Concurrency::Fixed(0), EachOptions::new());
        queue.run();
        assert!(is::pending(&aggregate));
    }
}
