//! Lazy keyed item sequences
//!
//! A [`Sequence`] is a cursor over `(Key, Value)` items. Like a generator,
//! it has a current item that stays put until the cursor is advanced, and
//! the underlying source is only pulled when needed: the first item when the
//! cursor is first inspected, later items only on [`Sequence::advance`].

use crate::promise::Promise;
use crate::value::{Key, Value};
use std::fmt;

/// Cursor over a lazy, possibly infinite, source of keyed items
pub struct Sequence {
    source: Box<dyn Iterator<Item = (Key, Value)>>,
    current: Option<(Key, Value)>,
    started: bool,
}

impl Sequence {
    /// Wrap an iterator of keyed items
    pub fn keyed<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (Key, Value)>,
        I::IntoIter: 'static,
    {
        Self {
            source: Box::new(items.into_iter()),
            current: None,
            started: false,
        }
    }

    /// Wrap an iterator of items, keyed by position
    pub fn lazy<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        Self::keyed(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Key::Index(i), item)),
        )
    }

    /// A single item at index 0
    pub fn once(item: Value) -> Self {
        Self::keyed(std::iter::once((Key::Index(0), item)))
    }

    /// No items
    pub fn empty() -> Self {
        Self::keyed(std::iter::empty())
    }

    fn start(&mut self) {
        if !self.started {
            self.started = true;
            self.current = self.source.next();
        }
    }

    /// Whether the cursor is on an item
    pub fn valid(&mut self) -> bool {
        self.start();
        self.current.is_some()
    }

    /// The item under the cursor
    pub fn current(&mut self) -> Option<(Key, Value)> {
        self.start();
        self.current.clone()
    }

    /// Move to the next item, pulling it from the source
    pub fn advance(&mut self) {
        self.start();
        if self.current.is_some() {
            self.current = self.source.next();
        }
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("started", &self.started)
            .field("current", &self.current)
            .finish()
    }
}

impl From<Value> for Sequence {
    fn from(value: Value) -> Self {
        crate::create::iterator_for(value)
    }
}

impl From<Vec<Value>> for Sequence {
    fn from(items: Vec<Value>) -> Self {
        Sequence::lazy(items)
    }
}

impl From<Vec<Promise>> for Sequence {
    fn from(promises: Vec<Promise>) -> Self {
        Sequence::lazy(promises.into_iter().map(Value::Promise))
    }
}
