//! Command Module
//!
//! This module implements the command processing layer for minikv.
//! It receives parsed argument vectors, executes them against the database,
//! and returns the reply to queue.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ RequestParser   │  (protocol module)
//! └────────┬────────┘
//!          │ Vec<Value>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Arity check  │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Db              │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `SET`, `GET`, `DEL`, `EXISTS`
//! - `EXPIRE`, `TTL`, `PERSIST`
//! - `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`, `COMMAND`, `QUIT`

pub mod handler;

// Re-export the main command handler
pub use handler::{lookup, Command, CommandHandler, CommandProc, Outcome, COMMANDS};
