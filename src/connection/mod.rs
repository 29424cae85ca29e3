//! Connection Module
//!
//! Client sessions driven by the event loop. Nothing here blocks: reads and
//! writes run until the socket reports `WouldBlock` and resume on the next
//! readiness callback.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Client                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ query_buf   │───>│ Request     │───>│ (commands)  │      │
//! │  │ (BytesMut)  │    │ Parser      │    └──────┬──────┘      │
//! │  └─────────────┘    └─────────────┘           │             │
//! │                                               ▼             │
//! │                                      ┌─────────────────┐    │
//! │                                      │ ReplyQueue      │    │
//! │                                      │ (+ sent_len)    │    │
//! │                                      └─────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Fragmentation**: requests may arrive split at any byte
//! - **Pipelining**: several requests per read, replied to in order
//! - **Backpressure**: partial writes keep their offset and never resend bytes
//! - **Statistics**: connection and traffic counters

pub mod client;
pub mod stats;

// Re-export commonly used types
pub use client::{read_into, Client, ConnectionError, ConnectionResult, ReadOutcome, ReplyQueue};
pub use stats::ConnectionStats;
