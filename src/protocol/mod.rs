//! Wire Protocol
//!
//! Requests are RESP arrays of bulk strings. Replies use a smaller line-based
//! grammar: status lines, error lines and integers.
//!
//! ## Modules
//!
//! - `parser`: resumable request parser that survives arbitrary TCP fragmentation
//! - `reply`: the `Reply` enum and its encoding
//!
//! ## Example
//!
//! ```
//! use minikv::protocol::{Reply, RequestParser};
//! use bytes::BytesMut;
//!
//! // Parsing incoming data
//! let mut parser = RequestParser::new();
//! let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
//! let args = parser.parse(&mut buf).unwrap().unwrap();
//! assert_eq!(args.len(), 2);
//!
//! // Creating responses
//! assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
//! ```

pub mod parser;
pub mod reply;

// Re-export commonly used types for convenience
pub use parser::{ParseError, ParseResult, RequestParser, MAX_ARGS, MAX_BULK_SIZE, MAX_HEADER_LEN};
pub use reply::Reply;

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// First byte of each line type.
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}
