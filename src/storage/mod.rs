//! Storage Module
//!
//! This module provides the in-memory storage for minikv.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Db                                │
//! │   ┌──────────────────────┐     ┌──────────────────────┐     │
//! │   │   data: Dict         │     │   expires: Dict      │     │
//! │   │   key -> value       │     │   key -> deadline    │     │
//! │   └──────────────────────┘     └──────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                ▲                             ▲
//!                │ commands                    │ server cron
//!                │                             │ (active expiry)
//! ```
//!
//! ## Components
//!
//! - [`Value`]: reference-counted, tagged values (keys, values, arguments, replies)
//! - [`Dict`]: open-chaining hash table with incremental rehashing
//! - [`Db`]: the keyspace, with lazy and active expiry
//!
//! ## Example
//!
//! ```
//! use minikv::storage::{Db, Value};
//! use std::time::Duration;
//!
//! let mut db = Db::new();
//! db.set(Value::from("name"), Value::from("minikv")).unwrap();
//! assert_eq!(db.get(&Value::from("name")).unwrap().as_str(), Some("minikv"));
//!
//! db.set_with_ttl(Value::from("session"), Value::from("abc"), Duration::from_secs(60)).unwrap();
//! ```

pub mod db;
pub mod dict;
pub mod object;

// Re-export commonly used types
pub use db::{unix_millis, Db, DbError, DbStats, Ttl};
pub use dict::{Dict, DictError, DictStats, DictType, StringKeys, INITIAL_SIZE};
pub use object::{Value, ValueKind};
