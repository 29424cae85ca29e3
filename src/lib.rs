//! # minikv - A Single-Threaded In-Memory Key-Value Server
//!
//! minikv is a small Redis-style key-value server. One thread runs a
//! readiness-driven event loop that multiplexes every client socket and the
//! periodic housekeeping timer; nothing is locked because nothing is shared.
//!
//! ## Features
//!
//! - **Event Loop**: mio-based reactor with file events and cancellable timers
//! - **Incremental Rehashing**: the hash table grows one bucket at a time
//! - **Resumable Parsing**: requests may arrive split at any byte
//! - **TTL Support**: lazy expiry on access plus sampled active expiry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               minikv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ EventLoop   │───>│ Client      │───>│ Command     │                  │
//! │  │ (mio Poll)  │    │ (parser,    │    │ Handler     │                  │
//! │  └──────┬──────┘    │  replies)   │    └──────┬──────┘                  │
//! │         │           └─────────────┘           │                         │
//! │         │ cron                                ▼                         │
//! │         │                      ┌──────────────────────────────┐         │
//! │         └─────────────────────>│ Db                           │         │
//! │           active expiry        │  data: Dict   expires: Dict  │         │
//! │                                └──────────────────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use minikv::config::Config;
//! use minikv::server::Server;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind(Config::default())?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value [EX seconds | PX milliseconds]`, `GET key`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `EXPIRE key seconds`, `TTL key`, `PERSIST key`
//! - `PING [message]`, `ECHO message`, `DBSIZE`, `FLUSHDB`, `COMMAND`, `QUIT`
//!
//! ## Module Overview
//!
//! - [`event`]: the reactor and its timer list
//! - [`storage`]: values, the incrementally rehashing dict and the keyspace
//! - [`protocol`]: request parser and reply encoding
//! - [`connection`]: per-client buffers and the reply queue
//! - [`commands`]: the command table
//! - [`server`]: the context object wiring it all together
//! - [`config`]: JSON configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod event;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Config, ConfigError};
pub use connection::{Client, ConnectionStats};
pub use event::{Direction, EventLoop, EventLoopError, TimerId, TimerKind};
pub use protocol::{ParseError, Reply, RequestParser};
pub use server::{Server, ServerError, ShutdownHandle};
pub use storage::{Db, Dict, DictError, Value};

/// The default port minikv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host minikv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of minikv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
