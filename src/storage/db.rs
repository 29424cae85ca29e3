//! The Keyspace
//!
//! `Db` pairs two independent [`Dict`]s that share the same key strategy:
//!
//! - `data`: key → value
//! - `expires`: key → deadline, a string value holding unix milliseconds
//!
//! ## Expiry
//!
//! Keys with a deadline are removed in two ways:
//!
//! 1. **Lazy**: reading a key checks its deadline first.
//! 2. **Active**: the server cron calls [`Db::active_expire_cycle`], which
//!    samples random entries of `expires` and drops the ones that are due.
//!
//! Everything here runs on the event loop thread, so no operation is ever
//! observed half-applied.

use crate::storage::{Dict, DictError, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::trace;

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Errors from keyspace operations that take a time-to-live.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DbError {
    #[error(transparent)]
    Dict(#[from] DictError),

    /// The deadline does not fit in a unix-millisecond timestamp
    #[error("expire time out of range")]
    DeadlineOverflow,
}

/// The absolute deadline `ttl` from `now_ms`, if it is representable.
fn deadline_after(now_ms: i64, ttl: Duration) -> Result<i64, DbError> {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| now_ms.checked_add(ms))
        .ok_or(DbError::DeadlineOverflow)
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist
    Missing,
    /// The key exists and never expires
    Persistent,
    /// The key expires after this long
    Remaining(Duration),
}

/// Keyspace counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub hits: u64,
    pub misses: u64,
    pub expired_keys: u64,
}

/// The database: a data dict and an expiration dict.
#[derive(Debug, Default)]
pub struct Db {
    data: Dict,
    expires: Dict,
    stats: DbStats,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired keys not yet reclaimed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys carrying a deadline.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    pub fn stats(&self) -> DbStats {
        self.stats
    }

    /// Deletes `key` if its deadline has passed. Returns true if it did.
    fn expire_if_needed(&mut self, key: &Value, now_ms: i64) -> bool {
        let due = self
            .expires
            .get(key)
            .and_then(|deadline| deadline.to_i64())
            .is_some_and(|deadline| now_ms >= deadline);

        if due {
            self.expires.delete(key);
            self.data.delete(key);
            self.stats.expired_keys += 1;
            trace!(key = ?key, "key expired on access");
        }
        due
    }

    /// Gets the value of a live key.
    pub fn get(&mut self, key: &Value) -> Option<Value> {
        self.expire_if_needed(key, unix_millis());
        let value = self.data.get(key);
        if value.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        value
    }

    pub fn exists(&mut self, key: &Value) -> bool {
        self.expire_if_needed(key, unix_millis());
        self.data.contains_key(key)
    }

    /// Stores `val` under `key`, replacing any previous value and deadline.
    pub fn set(&mut self, key: Value, val: Value) -> Result<(), DictError> {
        self.expires.delete(&key);
        match self.data.set(&key, val.clone()) {
            Err(DictError::NotFound) => self.data.add(key, val),
            other => other,
        }
    }

    /// Stores `val` under `key` with a time-to-live.
    ///
    /// Nothing is stored if the deadline overflows.
    pub fn set_with_ttl(&mut self, key: Value, val: Value, ttl: Duration) -> Result<(), DbError> {
        let at_ms = deadline_after(unix_millis(), ttl)?;
        self.set(key.clone(), val)?;
        Ok(self.set_deadline(key, at_ms)?)
    }

    fn set_deadline(&mut self, key: Value, at_ms: i64) -> Result<(), DictError> {
        let deadline = Value::from_i64(at_ms);
        match self.expires.set(&key, deadline.clone()) {
            Err(DictError::NotFound) => self.expires.add(key, deadline),
            other => other,
        }
    }

    /// Removes `key` and its deadline. Returns whether a live key was removed.
    pub fn delete(&mut self, key: &Value) -> bool {
        if self.expire_if_needed(key, unix_millis()) {
            return false;
        }
        self.expires.delete(key);
        self.data.delete(key)
    }

    /// Gives an existing key a time-to-live. Returns false if the key is missing.
    ///
    /// The key is left untouched if the deadline overflows.
    pub fn expire(&mut self, key: &Value, ttl: Duration) -> Result<bool, DbError> {
        let at_ms = deadline_after(unix_millis(), ttl)?;
        if !self.exists(key) {
            return Ok(false);
        }
        self.set_deadline(key.clone(), at_ms)?;
        Ok(true)
    }

    /// Removes the deadline of a key. Returns whether a deadline was removed.
    pub fn persist(&mut self, key: &Value) -> bool {
        if !self.exists(key) {
            return false;
        }
        self.expires.delete(key)
    }

    pub fn ttl(&mut self, key: &Value) -> Ttl {
        let now = unix_millis();
        self.expire_if_needed(key, now);
        if !self.data.contains_key(key) {
            return Ttl::Missing;
        }
        match self.expires.get(key).and_then(|d| d.to_i64()) {
            Some(deadline) => Ttl::Remaining(Duration::from_millis((deadline - now).max(0) as u64)),
            None => Ttl::Persistent,
        }
    }

    /// Samples up to `samples` keys with a deadline and removes the expired
    /// ones. Returns the number of keys removed.
    pub fn active_expire_cycle(&mut self, samples: usize) -> usize {
        let now = unix_millis();
        let mut removed = 0;

        for _ in 0..samples {
            let Some((key, deadline)) = self.expires.random_get() else {
                break;
            };
            // Entries without a readable deadline are left alone.
            let Some(deadline) = deadline.to_i64() else {
                continue;
            };
            if now >= deadline {
                self.expires.delete(&key);
                self.data.delete(&key);
                removed += 1;
            }
        }

        self.stats.expired_keys += removed as u64;
        removed
    }

    /// Removes every key.
    pub fn flush(&mut self) {
        self.data.clear();
        self.expires.clear();
    }
}
