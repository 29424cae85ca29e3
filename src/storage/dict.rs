//! Incrementally Rehashing Hash Table
//!
//! `Dict` is the only storage primitive of the database. It is an
//! open-chaining hash map keyed by [`Value`]s that grows without ever
//! pausing for a full rehash.
//!
//! ## Layout
//!
//! ```text
//!            ht[0] (primary)                 ht[1] (only while rehashing)
//! ┌─────┬─────┬─────┬─────┬─────┐   ┌─────┬─────┬─────┬─────┬ ─ ─ ┬─────┐
//! │  ·  │  ·  │  ·  │  ·  │ ... │   │  ·  │  ·  │  ·  │  ·  │     │  ·  │
//! └──┬──┴─────┴──┬──┴─────┴─────┘   └─────┴──┬──┴─────┴─────┴ ─ ─ ┴─────┘
//!    ▼           ▼                           ▼
//!  entry       entry      rehash_idx ──>   entry
//!    ▼                    (next primary      ▼
//!  entry                   bucket to move) entry
//! ```
//!
//! ## Incremental Rehashing
//!
//! Every public operation first runs one maintenance step:
//!
//! 1. No table yet: allocate the primary table with [`INITIAL_SIZE`] buckets.
//! 2. Rehash in progress: move one non-empty primary bucket into the
//!    secondary table.
//! 3. Load factor `used / size` reached 1: allocate a secondary table twice
//!    the size and move the first bucket.
//!
//! When the scan runs off the end of the primary table, the secondary table
//! becomes the primary. The extra work per operation is bounded by one
//! bucket chain.
//!
//! While rehashing, new keys go to the secondary table and lookups probe the
//! secondary table first.

use crate::storage::Value;
use rand::Rng;
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Number of buckets of a freshly allocated table.
pub const INITIAL_SIZE: usize = 16;

/// Growth starts when `used / size` reaches this ratio.
const LOAD_FACTOR: usize = 1;

/// Errors reported by [`Dict`] operations.
///
/// These are ordinary results; the caller decides what the user sees.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    /// `add` was called with a key that is already present
    #[error("key already exists")]
    AlreadyExists,

    /// `set` was called with a key that is not present
    #[error("key not found")]
    NotFound,
}

/// The hashing and equality strategy of a dict.
pub trait DictType {
    fn hash(&self, key: &Value) -> u64;
    fn equal(&self, a: &Value, b: &Value) -> bool;
}

/// Keys compared by their string payload, hashed with CRC32.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringKeys;

impl DictType for StringKeys {
    #[inline]
    fn hash(&self, key: &Value) -> u64 {
        crc32fast::hash(key.as_bytes()) as u64
    }

    #[inline]
    fn equal(&self, a: &Value, b: &Value) -> bool {
        a.is_string() && b.is_string() && a.as_bytes() == b.as_bytes()
    }
}

struct Entry {
    key: Value,
    val: Value,
    next: Option<Box<Entry>>,
}

struct HTable {
    buckets: Vec<Option<Box<Entry>>>,
    size: usize,
    mask: usize,
    used: usize,
}

impl HTable {
    fn with_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        Self {
            buckets: (0..size).map(|_| None).collect(),
            size,
            mask: size - 1,
            used: 0,
        }
    }

    #[inline]
    fn bucket(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    fn find<T: DictType>(&self, ty: &T, hash: u64, key: &Value) -> Option<&Entry> {
        let mut cur = self.buckets[self.bucket(hash)].as_deref();
        while let Some(entry) = cur {
            if ty.equal(&entry.key, key) {
                return Some(entry);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    fn find_mut<T: DictType>(&mut self, ty: &T, hash: u64, key: &Value) -> Option<&mut Entry> {
        let idx = self.bucket(hash);
        let mut cur = self.buckets[idx].as_deref_mut();
        while let Some(entry) = cur {
            if ty.equal(&entry.key, key) {
                return Some(entry);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    fn push_front(&mut self, hash: u64, mut entry: Box<Entry>) {
        let idx = self.bucket(hash);
        entry.next = self.buckets[idx].take();
        self.buckets[idx] = Some(entry);
        self.used += 1;
    }

    /// Unlinks the entry for `key` from its chain.
    fn remove<T: DictType>(&mut self, ty: &T, hash: u64, key: &Value) -> Option<Box<Entry>> {
        let idx = self.bucket(hash);
        let head = &mut self.buckets[idx];

        if ty.equal(&head.as_ref()?.key, key) {
            let mut removed = head.take()?;
            *head = removed.next.take();
            self.used -= 1;
            return Some(removed);
        }

        let mut prev = head.as_mut()?;
        loop {
            let hit = ty.equal(&prev.next.as_ref()?.key, key);
            if hit {
                let mut removed = prev.next.take()?;
                prev.next = removed.next.take();
                self.used -= 1;
                return Some(removed);
            }
            prev = prev.next.as_mut()?;
        }
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.buckets.iter().flat_map(|bucket| Chain {
            cur: bucket.as_deref(),
        })
    }
}

struct Chain<'a> {
    cur: Option<&'a Entry>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cur?;
        self.cur = entry.next.as_deref();
        Some(entry)
    }
}

/// Occupancy snapshot, mostly useful for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictStats {
    /// Bucket count of the primary table (0 before the first operation)
    pub primary_size: usize,
    /// Entries in the primary table
    pub primary_used: usize,
    /// Bucket count of the secondary table (0 when not rehashing)
    pub secondary_size: usize,
    /// Entries in the secondary table
    pub secondary_used: usize,
    pub rehashing: bool,
}

/// An open-chaining hash map with incremental rehashing.
///
/// # Example
///
/// ```
/// use minikv::storage::{Dict, DictError, Value};
///
/// let mut dict = Dict::new();
/// dict.add(Value::from("name"), Value::from("minikv")).unwrap();
/// assert_eq!(
///     dict.add(Value::from("name"), Value::from("other")),
///     Err(DictError::AlreadyExists)
/// );
///
/// dict.set(&Value::from("name"), Value::from("kv")).unwrap();
/// assert_eq!(dict.get(&Value::from("name")).unwrap().as_str(), Some("kv"));
/// ```
pub struct Dict<T: DictType = StringKeys> {
    ty: T,
    ht: [Option<HTable>; 2],
    /// Next primary bucket to migrate; `None` when not rehashing
    rehash_idx: Option<usize>,
}

impl Default for Dict<StringKeys> {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict<StringKeys> {
    /// Creates an empty dict keyed by strings. No table is allocated until
    /// the first operation.
    pub fn new() -> Self {
        Self::with_type(StringKeys)
    }
}

impl<T: DictType> Dict<T> {
    pub fn with_type(ty: T) -> Self {
        Self {
            ty,
            ht: [None, None],
            rehash_idx: None,
        }
    }

    /// Number of keys across both tables.
    pub fn len(&self) -> usize {
        self.used(0) + self.used(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    pub fn stats(&self) -> DictStats {
        let size = |i: usize| self.ht[i].as_ref().map_or(0, |t| t.size);
        DictStats {
            primary_size: size(0),
            primary_used: self.used(0),
            secondary_size: size(1),
            secondary_used: self.used(1),
            rehashing: self.is_rehashing(),
        }
    }

    fn used(&self, table: usize) -> usize {
        self.ht[table].as_ref().map_or(0, |t| t.used)
    }

    /// Tables to probe for an existing key, newest first.
    fn probe_order(&self) -> &'static [usize] {
        if self.is_rehashing() {
            &[1, 0]
        } else {
            &[0]
        }
    }

    /// Index of the table holding `key`, if any.
    fn locate(&self, hash: u64, key: &Value) -> Option<usize> {
        self.probe_order().iter().copied().find(|&i| {
            self.ht[i]
                .as_ref()
                .is_some_and(|t| t.find(&self.ty, hash, key).is_some())
        })
    }

    /// The per-operation maintenance step.
    fn maintain(&mut self) {
        if self.ht[0].is_none() {
            self.ht[0] = Some(HTable::with_size(INITIAL_SIZE));
            return;
        }
        if self.is_rehashing() {
            self.rehash_step();
            return;
        }

        let (used, size) = self.ht[0].as_ref().map_or((0, 0), |t| (t.used, t.size));
        if used >= size * LOAD_FACTOR {
            let grown = size << 1;
            trace!(from = size, to = grown, "dict rehash started");
            self.ht[1] = Some(HTable::with_size(grown));
            self.rehash_idx = Some(0);
            self.rehash_step();
        }
    }

    /// Migrates the next non-empty primary bucket into the secondary table.
    ///
    /// Does nothing when no rehash is in progress. Once the primary table is
    /// exhausted the secondary table takes its place.
    pub fn rehash_step(&mut self) {
        let Some(start) = self.rehash_idx else {
            return;
        };

        let [primary, secondary] = &mut self.ht;
        let (Some(from), Some(to)) = (primary.as_mut(), secondary.as_mut()) else {
            return;
        };

        let mut idx = start;
        while idx < from.buckets.len() && from.buckets[idx].is_none() {
            idx += 1;
        }
        if from.used == 0 || idx >= from.buckets.len() {
            self.finish_rehash();
            return;
        }

        let mut chain = from.buckets[idx].take();
        while let Some(mut entry) = chain {
            chain = entry.next.take();
            let hash = self.ty.hash(&entry.key);
            to.push_front(hash, entry);
            from.used -= 1;
        }
        self.rehash_idx = Some(idx + 1);
    }

    fn finish_rehash(&mut self) {
        self.ht[0] = self.ht[1].take();
        self.rehash_idx = None;
        trace!(size = self.stats().primary_size, "dict rehash finished");
    }

    /// Looks up the value stored for `key`.
    pub fn get(&mut self, key: &Value) -> Option<Value> {
        self.maintain();
        let hash = self.ty.hash(key);
        let table = self.locate(hash, key)?;
        self.ht[table]
            .as_ref()?
            .find(&self.ty, hash, key)
            .map(|entry| entry.val.clone())
    }

    pub fn contains_key(&mut self, key: &Value) -> bool {
        self.maintain();
        let hash = self.ty.hash(key);
        self.locate(hash, key).is_some()
    }

    /// Inserts a new key. Fails if the key is already present, leaving the
    /// stored value untouched.
    pub fn add(&mut self, key: Value, val: Value) -> Result<(), DictError> {
        self.maintain();
        let hash = self.ty.hash(&key);
        if self.locate(hash, &key).is_some() {
            return Err(DictError::AlreadyExists);
        }

        let target = if self.is_rehashing() { 1 } else { 0 };
        self.ht[target]
            .get_or_insert_with(|| HTable::with_size(INITIAL_SIZE))
            .push_front(hash, Box::new(Entry { key, val, next: None }));
        Ok(())
    }

    /// Replaces the value of an existing key in place. Fails if the key is
    /// absent; this is not an upsert.
    pub fn set(&mut self, key: &Value, val: Value) -> Result<(), DictError> {
        self.maintain();
        let hash = self.ty.hash(key);
        let table = self.locate(hash, key).ok_or(DictError::NotFound)?;
        let entry = self.ht[table]
            .as_mut()
            .and_then(|t| t.find_mut(&self.ty, hash, key))
            .ok_or(DictError::NotFound)?;

        // The previous value is released by the assignment.
        entry.val = val;
        Ok(())
    }

    /// Removes `key`. Returns whether anything was removed.
    pub fn delete(&mut self, key: &Value) -> bool {
        self.maintain();
        let hash = self.ty.hash(key);

        let mut removed = false;
        for i in 0..2 {
            if let Some(table) = self.ht[i].as_mut() {
                removed |= table.remove(&self.ty, hash, key).is_some();
            }
            if !self.is_rehashing() {
                break;
            }
        }
        removed
    }

    /// Returns an arbitrary `(key, value)` pair, or `None` if empty.
    ///
    /// While rehashing, the table holding more entries is sampled.
    pub fn random_get(&mut self) -> Option<(Value, Value)> {
        self.maintain();
        let pick = if self.is_rehashing() && self.used(1) > self.used(0) {
            1
        } else {
            0
        };

        let table = self.ht[pick].as_ref()?;
        if table.used == 0 {
            return None;
        }
        let nth = rand::thread_rng().gen_range(0..table.used);
        table
            .entries()
            .nth(nth)
            .map(|entry| (entry.key.clone(), entry.val.clone()))
    }

    /// Drops every entry and both tables.
    pub fn clear(&mut self) {
        self.ht = [None, None];
        self.rehash_idx = None;
    }
}

impl<T: DictType> fmt::Debug for Dict<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("Dict")
            .field("len", &self.len())
            .field("primary_size", &stats.primary_size)
            .field("rehash_idx", &self.rehash_idx)
            .finish()
    }
}
