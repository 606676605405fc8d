//! Dynamic values carried by promises
//!
//! Promises in this crate are dynamically typed: a fulfillment value or a
//! rejection reason is any [`Value`]. A value may itself be a [`Promise`] or a
//! foreign [`Thenable`], in which case settling with it adopts its outcome.

use crate::error::{Error, Result};
use crate::promise::Promise;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// One-shot settle function handed to [`Thenable::then`]
pub type Settler = Box<dyn FnOnce(Value)>;

/// Anything exposing a `then`-shaped capability.
///
/// This is the open extension point of the library: a type only has to
/// implement `then` to be adoptable by [`crate::create::promise_for`]. The
/// optional `wait` and `cancel` capabilities are picked up by the bridging
/// promise when `can_wait` / `can_cancel` report them.
pub trait Thenable {
    /// Register settle functions. Exactly one of them should eventually be
    /// called, at most once.
    fn then(&self, on_fulfilled: Settler, on_rejected: Settler);

    /// Whether [`Thenable::wait`] does anything useful
    fn can_wait(&self) -> bool {
        false
    }

    /// Block until the thenable has called one of its settle functions
    fn wait(&self) -> Result<()> {
        Ok(())
    }

    /// Whether [`Thenable::cancel`] does anything useful
    fn can_cancel(&self) -> bool {
        false
    }

    /// Abort the underlying work, if possible
    fn cancel(&self) {}
}

/// A promise value or rejection reason
#[derive(Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Ordered list
    Array(Vec<Value>),
    /// Named fields, ordered by name
    Object(BTreeMap<String, Value>),
    /// An error raised by user code or by the library
    Error(Rc<Error>),
    /// A promise of this library
    Promise(Promise),
    /// A foreign object exposing `then`
    Thenable(Rc<dyn Thenable>),
}

impl Value {
    /// Wrap a foreign thenable
    pub fn thenable<T: Thenable + 'static>(thenable: T) -> Self {
        Value::Thenable(Rc::new(thenable))
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the string contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the number, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the elements, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get the fields, if this is an object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get the error, if this is an error value
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Get the promise, if this is a promise
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(field))
    }

    /// Short type name, used in log lines
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Thenable(_) => "thenable",
        }
    }

    /// Build a collection from keyed entries.
    ///
    /// Entries are sorted by key. When every key is an index the result is an
    /// array, otherwise an object keyed by the rendered key.
    pub fn from_keyed(mut entries: Vec<(Key, Value)>) -> Value {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        if entries.iter().all(|(key, _)| matches!(key, Key::Index(_))) {
            Value::Array(entries.into_iter().map(|(_, value)| value).collect())
        } else {
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value))
                    .collect(),
            )
        }
    }

    /// Convert to a JSON value for rendering
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error(e) => Json::String(e.to_string()),
            Value::Promise(_) => Json::String("[promise]".to_string()),
            Value::Thenable(_) => Json::String("[thenable]".to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            // Errors, promises and thenables compare by identity
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(fields) => f.debug_tuple("Object").field(fields).finish(),
            Value::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Value::Promise(p) => f.debug_tuple("Promise").field(p).finish(),
            Value::Thenable(_) => write!(f, "Thenable {{ ... }}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Error(e) => write!(f, "{}", e),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(Rc::new(e))
    }
}

/// The key a sequence attaches to an item.
///
/// Keys are the source's own and may repeat; the library never uses them for
/// bookkeeping, only hands them back to callbacks and orders results by them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Position in an ordered sequence
    Index(usize),
    /// Name in a keyed collection
    Name(String),
}

impl Key {
    /// Convert to a value
    pub fn to_value(&self) -> Value {
        match self {
            Key::Index(i) => Value::from(*i),
            Key::Name(name) => Value::from(name.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}
