//! Bounded-concurrency iteration over promises
//!
//! [`EachPromise`] drives a lazy [`Sequence`] of promise-or-value items,
//! keeping at most a configured number of them in flight, invoking per-item
//! callbacks as they settle, and resolving one aggregate promise once the
//! sequence is exhausted and nothing is left in flight.
//!
//! # Example
//! ```
//! use deferred::each::{EachOptions, EachPromise};
//! use deferred::{TaskQueue, Value};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let queue = TaskQueue::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let s = seen.clone();
//!
//! let each = EachPromise::new(
//!     &queue,
//!     vec![Value::from(1), Value::from(2), Value::from(3)],
//!     EachOptions::new().limit(2).on_fulfilled(move |value, _key, _aggregate| {
//!         s.borrow_mut().push(value);
//!         Ok(())
//!     }),
//! );
//! each.promise().wait().unwrap();
//! assert_eq!(seen.borrow().len(), 3);
//! ```

mod sequence;

pub use sequence::Sequence;

use crate::create;
use crate::error::Result;
use crate::is;
use crate::promise::{log_settle_error, Promise, PromiseState};
use crate::task_queue::TaskQueue;
use crate::value::{Key, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::Bound;
use std::rc::Rc;
use tracing::{debug, trace};

/// Per-item callback: the settled value or reason, the source's key for the
/// item, and the aggregate promise (which the callback may settle early)
pub type ItemCallback = Rc<dyn Fn(Value, Key, &Promise) -> Result<()>>;

/// How many items may be in flight at once
#[derive(Clone, Default)]
pub enum Concurrency {
    /// Attach every item as soon as it is available
    #[default]
    Unbounded,
    /// At most this many items in flight; 0 admits nothing
    Fixed(usize),
    /// Limit computed from the current number of in-flight items
    Dynamic(Rc<dyn Fn(usize) -> usize>),
}

impl Concurrency {
    /// Limit computed by `f` from the current in-flight count
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(usize) -> usize + 'static,
    {
        Concurrency::Dynamic(Rc::new(f))
    }

    fn limit(&self, in_flight: usize) -> Option<usize> {
        match self {
            Concurrency::Unbounded => None,
            Concurrency::Fixed(n) => Some(*n),
            Concurrency::Dynamic(f) => Some(f(in_flight)),
        }
    }
}

impl fmt::Debug for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Unbounded => write!(f, "Unbounded"),
            Concurrency::Fixed(n) => write!(f, "Fixed({})", n),
            Concurrency::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

/// Configuration for an [`EachPromise`] run
#[derive(Clone, Default)]
pub struct EachOptions {
    concurrency: Concurrency,
    on_fulfilled: Option<ItemCallback>,
    on_rejected: Option<ItemCallback>,
}

impl EachOptions {
    /// Unbounded, no callbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit
    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set a fixed concurrency limit
    pub fn limit(self, limit: usize) -> Self {
        self.concurrency(Concurrency::Fixed(limit))
    }

    /// Callback for each fulfilled item
    pub fn on_fulfilled<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, Key, &Promise) -> Result<()> + 'static,
    {
        self.on_fulfilled = Some(Rc::new(f));
        self
    }

    /// Callback for each rejected item
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, Key, &Promise) -> Result<()> + 'static,
    {
        self.on_rejected = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for EachOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EachOptions")
            .field("concurrency", &self.concurrency)
            .field("on_fulfilled", &self.on_fulfilled.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}

struct EachState {
    source: Option<Sequence>,
    concurrency: Option<Concurrency>,
    on_fulfilled: Option<ItemCallback>,
    on_rejected: Option<ItemCallback>,
    /// In-flight items keyed by a synthetic, strictly increasing index
    pending: BTreeMap<usize, Promise>,
    next_index: usize,
    aggregate: Option<Promise>,
    /// The source is checked out; re-entrant attempts to touch it back off
    advancing: bool,
    /// The item under the cursor is already in flight
    attached: bool,
    released: bool,
    queue: TaskQueue,
}

/// Aggregator over a lazy sequence of promise-or-value items
#[derive(Clone)]
pub struct EachPromise {
    state: Rc<RefCell<EachState>>,
}

impl EachPromise {
    /// Prepare a run; nothing is pulled from `source` until [`EachPromise::promise`]
    pub fn new(queue: &TaskQueue, source: impl Into<Sequence>, options: EachOptions) -> Self {
        let EachOptions {
            concurrency,
            on_fulfilled,
            on_rejected,
        } = options;
        Self {
            state: Rc::new(RefCell::new(EachState {
                source: Some(source.into()),
                concurrency: Some(concurrency),
                on_fulfilled,
                on_rejected,
                pending: BTreeMap::new(),
                next_index: 0,
                aggregate: None,
                advancing: false,
                attached: false,
                released: false,
                queue: queue.clone(),
            })),
        }
    }

    /// The aggregate promise.
    ///
    /// The first call creates it and attaches the first batch of items;
    /// later calls return the same promise.
    pub fn promise(&self) -> Promise {
        if let Some(aggregate) = self.state.borrow().aggregate.clone() {
            return aggregate;
        }

        let aggregate = self.create_aggregate();
        Self::refill(&self.state);
        Self::check_if_finished(&self.state);
        aggregate
    }

    /// Number of items currently in flight
    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn create_aggregate(&self) -> Promise {
        let queue = self.state.borrow().queue.clone();
        let weak = Rc::downgrade(&self.state);
        let aggregate = Promise::with_wait(&queue, move |aggregate| match weak.upgrade() {
            Some(state) => Self::wait_pending(&state, aggregate),
            None => Ok(()),
        });
        self.state.borrow_mut().aggregate = Some(aggregate.clone());

        let (on_fulfilled, on_rejected) = (self.state.clone(), self.state.clone());
        aggregate.then(
            Some(Box::new(move |_| {
                Self::release(&on_fulfilled);
                Ok(Value::Null)
            })),
            Some(Box::new(move |_| {
                Self::release(&on_rejected);
                Ok(Value::Null)
            })),
        );
        aggregate
    }

    /// Wait strategy of the aggregate: wait on each in-flight item in index
    /// order, including items attached while waiting.
    fn wait_pending(state: &Rc<RefCell<EachState>>, aggregate: &Promise) -> Result<()> {
        if Self::check_if_finished(state) {
            return Ok(());
        }

        let mut last: Option<usize> = None;
        loop {
            let next = {
                let s = state.borrow();
                let lower = last.map_or(Bound::Unbounded, Bound::Excluded);
                s.pending
                    .range((lower, Bound::Unbounded))
                    .next()
                    .map(|(index, promise)| (*index, promise.clone()))
            };
            let Some((index, promise)) = next else {
                break;
            };
            last = Some(index);

            promise.wait()?;
            if is::settled(aggregate) {
                break;
            }
        }
        Ok(())
    }

    fn release(state: &Rc<RefCell<EachState>>) {
        let released = {
            let mut s = state.borrow_mut();
            s.released = true;
            s.next_index = 0;
            (
                s.source.take(),
                s.concurrency.take(),
                s.on_fulfilled.take(),
                s.on_rejected.take(),
                mem::take(&mut s.pending),
            )
        };
        debug!(dropped = released.4.len(), "each promise released");
        drop(released);
    }

    fn refill(state: &Rc<RefCell<EachState>>) {
        let (concurrency, in_flight) = {
            let s = state.borrow();
            (s.concurrency.clone(), s.pending.len())
        };
        let Some(concurrency) = concurrency else {
            return;
        };

        match concurrency.limit(in_flight) {
            None => while Self::next_fresh(state) && Self::add_pending(state) {},
            Some(limit) => {
                let mut budget = limit.saturating_sub(in_flight);
                trace!(limit, in_flight, budget, "refilling");
                // The item under the cursor is attached before advancing, so a
                // source whose next item depends on earlier callbacks is not
                // pulled early
                while budget > 0 && Self::next_fresh(state) && Self::add_pending(state) {
                    budget -= 1;
                }
            }
        }
    }

    /// Make sure the cursor is on an item not yet in flight
    fn next_fresh(state: &Rc<RefCell<EachState>>) -> bool {
        if !state.borrow().attached {
            return true;
        }
        let moved = Self::with_source(state, Sequence::advance).is_some();
        if moved {
            state.borrow_mut().attached = false;
        }
        moved
    }

    /// Attach the item under the cursor
    fn add_pending(state: &Rc<RefCell<EachState>>) -> bool {
        let Some(Some((key, item))) = Self::with_source(state, Sequence::current) else {
            return false;
        };

        let (index, queue) = {
            let mut s = state.borrow_mut();
            let index = s.next_index;
            s.next_index += 1;
            s.attached = true;
            (index, s.queue.clone())
        };

        let promise = create::promise_for(&queue, item);
        let (on_fulfilled, on_rejected) = (state.clone(), state.clone());
        let rejected_key = key.clone();
        let derived = promise.then(
            Some(Box::new(move |value| {
                Self::item_settled(&on_fulfilled, index, PromiseState::Fulfilled, value, key);
                Ok(Value::Null)
            })),
            Some(Box::new(move |reason| {
                Self::item_settled(&on_rejected, index, PromiseState::Rejected, reason, rejected_key);
                Ok(Value::Null)
            })),
        );

        trace!(index, "item attached");
        state.borrow_mut().pending.insert(index, derived);
        true
    }

    fn item_settled(
        state: &Rc<RefCell<EachState>>,
        index: usize,
        outcome: PromiseState,
        value: Value,
        key: Key,
    ) {
        let (callback, aggregate) = {
            let s = state.borrow();
            let callback = match outcome {
                PromiseState::Fulfilled => s.on_fulfilled.clone(),
                _ => s.on_rejected.clone(),
            };
            (callback, s.aggregate.clone())
        };
        let Some(aggregate) = aggregate else {
            return;
        };

        if let Some(callback) = callback {
            if let Err(e) = callback(value, key, &aggregate) {
                debug!(index, error = %e, "item callback failed");
                if is::pending(&aggregate) {
                    log_settle_error(aggregate.reject(Value::from(e)));
                }
                return;
            }
        }
        Self::step(state, index);
    }

    fn step(state: &Rc<RefCell<EachState>>, index: usize) {
        let aggregate = state.borrow().aggregate.clone();
        if aggregate.as_ref().map_or(true, is::settled) {
            return;
        }

        let removed = state.borrow_mut().pending.remove(&index);
        drop(removed);

        if Self::next_fresh(state) && !Self::check_if_finished(state) {
            Self::refill(state);
        }
    }

    fn check_if_finished(state: &Rc<RefCell<EachState>>) -> bool {
        if !state.borrow().pending.is_empty() {
            return false;
        }
        let exhausted = Self::with_source(state, |source| !source.valid()).unwrap_or(false);
        if !exhausted {
            return false;
        }

        let aggregate = state.borrow().aggregate.clone();
        if let Some(aggregate) = aggregate.filter(is::pending) {
            debug!("each promise finished");
            log_settle_error(aggregate.resolve(Value::Null));
        }
        true
    }

    /// Check the source out of the state while `f` runs.
    ///
    /// Returns `None` when the source is already checked out (a re-entrant
    /// call from inside the source itself) or has been released.
    fn with_source<R>(state: &Rc<RefCell<EachState>>, f: impl FnOnce(&mut Sequence) -> R) -> Option<R> {
        let mut source = {
            let mut s = state.borrow_mut();
            if s.advancing {
                return None;
            }
            let source = s.source.take()?;
            s.advancing = true;
            source
        };

        let out = f(&mut source);

        let mut s = state.borrow_mut();
        s.advancing = false;
        if !s.released {
            s.source = Some(source);
        }
        Some(out)
    }
}

impl fmt::Debug for EachPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        f.debug_struct("EachPromise")
            .field("pending", &s.pending.len())
            .field("next_index", &s.next_index)
            .field("released", &s.released)
            .finish()
    }
}

/// Run `options` over `source` and return the aggregate promise
pub fn of(queue: &TaskQueue, source: impl Into<Sequence>, options: EachOptions) -> Promise {
    EachPromise::new(queue, source, options).promise()
}

/// Like [`of`], with a concurrency limit
pub fn of_limit(
    queue: &TaskQueue,
    source: impl Into<Sequence>,
    limit: Concurrency,
    options: EachOptions,
) -> Promise {
    of(queue, source, options.concurrency(limit))
}

/// Like [`of_limit`], but the first rejected item rejects the aggregate.
///
/// Any `on_rejected` callback in `options` is replaced.
pub fn of_limit_all(
    queue: &TaskQueue,
    source: impl Into<Sequence>,
    limit: Concurrency,
    options: EachOptions,
) -> Promise {
    let options = options.on_rejected(|reason, _key, aggregate| {
        if is::pending(aggregate) {
            aggregate.reject(reason)?;
        }
        Ok(())
    });
    of_limit(queue, source, limit, options)
}
