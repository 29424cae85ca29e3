//! Reply Encoding
//!
//! Command handlers answer with a [`Reply`], which is encoded once into a
//! byte-string [`Value`] and queued on the client. The write path treats the
//! queued values as opaque bytes.
//!
//! ## Reply Grammar
//!
//! - `+<text>\r\n` status or value (`+OK`, `+PONG`, `+<value>`)
//! - `+null\r\n` lookup miss
//! - `-<message>\r\n` error
//! - `:<integer>\r\n` integer

use crate::protocol::{prefix, CRLF};
use crate::storage::Value;
use bytes::Bytes;
use std::fmt;

/// A reply produced by command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A status or value line.
    /// Format: `+<text>\r\n`
    Status(Bytes),

    /// An error line.
    /// Format: `-<message>\r\n`
    Error(String),

    /// A signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// A lookup that found nothing.
    /// Format: `+null\r\n`
    Null,
}

impl Reply {
    /// Creates a status line.
    ///
    /// # Example
    /// ```
    /// use minikv::protocol::Reply;
    /// assert_eq!(Reply::status("PONG").serialize(), b"+PONG\r\n");
    /// ```
    pub fn status(text: impl Into<Bytes>) -> Self {
        Reply::Status(text.into())
    }

    /// Creates an error line.
    ///
    /// # Example
    /// ```
    /// use minikv::protocol::Reply;
    /// assert_eq!(Reply::error("ERR syntax error").serialize(), b"-ERR syntax error\r\n");
    /// ```
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn null() -> Self {
        Reply::Null
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::Status(Bytes::from_static(b"OK"))
    }

    /// Echoes a stored value back as a status line.
    pub fn value(value: &Value) -> Self {
        Reply::Status(value.payload())
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(text) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(text);
            }
            Reply::Error(message) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(message.as_bytes());
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
            }
            Reply::Null => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(b"null");
            }
        }
        buf.extend_from_slice(CRLF);
    }

    /// Encodes the reply as an opaque byte-string value ready to be queued.
    pub fn into_value(self) -> Value {
        Value::string(self.serialize())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(text) => match std::str::from_utf8(text) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", text.len()),
            },
            Reply::Error(message) => write!(f, "(error) {}", message),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Null => write!(f, "(nil)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_serialize() {
        assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let reply = Reply::error("ERR unknown command 'foo'");
        assert_eq!(reply.serialize(), b"-ERR unknown command 'foo'\r\n");
        assert!(reply.is_error());
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::integer(-2).serialize(), b":-2\r\n");
    }

    #[test]
    fn test_null_serialize() {
        assert_eq!(Reply::null().serialize(), b"+null\r\n");
    }

    #[test]
    fn test_value_reply() {
        let stored = Value::from("world");
        let reply = Reply::value(&stored);
        assert_eq!(reply.serialize(), b"+world\r\n");
        assert_eq!(reply.to_string(), "\"world\"");
    }

    #[test]
    fn test_into_value() {
        let value = Reply::ok().into_value();
        assert_eq!(value.as_bytes(), b"+OK\r\n");
        assert_eq!(value.ref_count(), 1);
    }
}
