//! Reference-Counted Values
//!
//! Every key, stored value, parsed argument and queued reply in minikv is a
//! [`Value`]: a tagged payload behind a shared-ownership handle.
//!
//! ## Ownership
//!
//! `Value` wraps an `Rc`, so the reference count is explicit and atomic-free:
//!
//! - cloning a `Value` is the "increment" (a hash table entry, an argument
//!   vector and a reply queue each hold their own clone)
//! - dropping a `Value` is the "decrement"
//! - the payload is released exactly when the last handle goes away
//!
//! Values are never mutated once shared. Updating a key stores a *new* value
//! in the entry slot, and the old handle is dropped.
//!
//! The server is single-threaded, so `Value` is deliberately `!Send`.

use bytes::Bytes;
use std::fmt;
use std::rc::Rc;

/// The type tag of a value.
///
/// Only `String` is implemented. The other kinds are reserved so the tag
/// space matches the commands a fuller server would add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    List,
    Dict,
    Set,
    SortedSet,
}

impl ValueKind {
    /// The lowercase name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Dict => "hash",
            ValueKind::Set => "set",
            ValueKind::SortedSet => "zset",
        }
    }
}

#[derive(Debug)]
struct Object {
    kind: ValueKind,
    payload: Bytes,
}

/// A shared, immutable, tagged value.
#[derive(Clone)]
pub struct Value(Rc<Object>);

impl Value {
    /// Creates a string value.
    ///
    /// # Example
    /// ```
    /// use minikv::storage::Value;
    /// let v = Value::string("hello");
    /// assert_eq!(v.as_bytes(), b"hello");
    /// assert_eq!(v.ref_count(), 1);
    /// ```
    pub fn string(data: impl Into<Bytes>) -> Self {
        Self::new(ValueKind::String, data.into())
    }

    /// Creates a value of an arbitrary kind with a raw payload.
    pub fn new(kind: ValueKind, payload: Bytes) -> Self {
        Value(Rc::new(Object { kind, payload }))
    }

    /// Creates a string value holding the decimal form of `n`.
    pub fn from_i64(n: i64) -> Self {
        Self::string(n.to_string())
    }

    pub fn kind(&self) -> ValueKind {
        self.0.kind
    }

    pub fn is_string(&self) -> bool {
        self.0.kind == ValueKind::String
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.payload
    }

    /// A cheap clone of the payload buffer.
    pub fn payload(&self) -> Bytes {
        self.0.payload.clone()
    }

    pub fn len(&self) -> usize {
        self.0.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.payload.is_empty()
    }

    /// The payload as UTF-8, if it is a string value with valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        if !self.is_string() {
            return None;
        }
        std::str::from_utf8(&self.0.payload).ok()
    }

    /// Parses a string payload as a signed decimal integer.
    pub fn to_i64(&self) -> Option<i64> {
        self.as_str()?.parse().ok()
    }

    /// Number of live handles to this value.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Value({:?}, {:?})", self.0.kind, s),
            None => write!(f, "Value({:?}, {} bytes)", self.0.kind, self.len()),
        }
    }
}

/// Values compare by kind and payload bytes, not by allocation.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind == other.0.kind && self.0.payload == other.0.payload
    }
}

impl Eq for Value {}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::string(b)
    }
}
