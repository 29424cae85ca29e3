//! Resumable Request Parser
//!
//! Requests arrive as arrays of bulk strings:
//!
//! ```text
//! *<N>\r\n  then N times  $<L>\r\n<L bytes>\r\n
//! ```
//!
//! TCP delivers them in arbitrary fragments, so the parser is a small state
//! machine that remembers how far it got and consumes the buffer as it goes.
//!
//! ## State
//!
//! - `bulk_num`: arguments still missing from the current request
//!   (0 = the next byte starts a new request)
//! - `bulk_len`: body length of the argument being read
//!   (`None` = its `$<L>` header comes next)
//! - `args`: arguments extracted so far
//!
//! ## Results
//!
//! - `Ok(Some(args))` - a complete request was extracted
//! - `Ok(None)` - need more data; this is not an error
//! - `Err(ParseError)` - protocol violation, the connection must be dropped
//!
//! Each successful line or body extraction removes its bytes from the front of
//! the buffer, so the caller must dispatch a completed request before calling
//! `parse` again on what is left.

use crate::protocol::{prefix, CRLF};
use crate::storage::Value;
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Protocol violations. All of them are fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A header line started with the wrong byte
    #[error("expected '{expected}', found byte {found:#04x}")]
    UnexpectedMarker { expected: char, found: u8 },

    /// A header line did not contain a valid integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// The body was not followed by CRLF where its header said it would end
    #[error("bulk string of {0} bytes not terminated by CRLF")]
    MissingTerminator(usize),

    /// The request exceeds a size limit
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one request
pub const MAX_ARGS: usize = 1024 * 1024;

/// Maximum length of a `*<N>` or `$<L>` header line, CRLF excluded
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Per-connection parser state.
///
/// # Example
///
/// ```
/// use minikv::protocol::RequestParser;
/// use bytes::BytesMut;
///
/// let mut parser = RequestParser::new();
/// let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nna"[..]);
/// assert!(parser.parse(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(b"me\r\n");
/// let args = parser.parse(&mut buf).unwrap().unwrap();
/// assert_eq!(args[1].as_str(), Some("name"));
/// assert!(buf.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct RequestParser {
    bulk_num: usize,
    bulk_len: Option<usize>,
    args: Vec<Value>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments still missing from the request being parsed.
    pub fn pending_args(&self) -> usize {
        self.bulk_num
    }

    /// Body length of the argument being read, once its header is consumed.
    pub fn pending_len(&self) -> Option<usize> {
        self.bulk_len
    }

    /// True when no request is partially parsed.
    pub fn is_idle(&self) -> bool {
        self.bulk_num == 0 && self.args.is_empty()
    }

    /// Advances the parse as far as the buffered bytes allow.
    pub fn parse(&mut self, buf: &mut BytesMut) -> ParseResult<Option<Vec<Value>>> {
        if self.bulk_num == 0 {
            let Some(count) = take_header(buf, prefix::ARRAY)? else {
                return Ok(None);
            };
            // An empty or null array carries no command.
            if count <= 0 {
                return Ok(None);
            }
            let count = count as usize;
            if count > MAX_ARGS {
                return Err(ParseError::MessageTooLarge {
                    size: count,
                    max: MAX_ARGS,
                });
            }
            self.bulk_num = count;
            self.args.reserve(count.min(64));
        }

        while self.bulk_num > 0 {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(len) = take_header(buf, prefix::BULK_STRING)? else {
                        return Ok(None);
                    };
                    if len < 0 {
                        return Err(ParseError::InvalidBulkLength(len));
                    }
                    let len = len as usize;
                    if len > MAX_BULK_SIZE {
                        return Err(ParseError::MessageTooLarge {
                            size: len,
                            max: MAX_BULK_SIZE,
                        });
                    }
                    self.bulk_len = Some(len);
                    len
                }
            };

            if buf.len() < len + CRLF.len() {
                return Ok(None);
            }
            if &buf[len..len + CRLF.len()] != CRLF {
                return Err(ParseError::MissingTerminator(len));
            }

            let body = buf.split_to(len).freeze();
            buf.advance(CRLF.len());
            self.args.push(Value::string(body));
            self.bulk_len = None;
            self.bulk_num -= 1;
        }

        if self.args.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.args)))
    }
}

/// Consumes a `<marker><integer>\r\n` line and returns the integer.
///
/// A wrong marker is reported as soon as the first byte is available;
/// otherwise the line is only consumed once its CRLF has arrived. Only the
/// first `MAX_HEADER_LEN` bytes are searched for it.
fn take_header(buf: &mut BytesMut, marker: u8) -> ParseResult<Option<i64>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != marker {
        return Err(ParseError::UnexpectedMarker {
            expected: marker as char,
            found: first,
        });
    }

    let window = buf.len().min(MAX_HEADER_LEN + CRLF.len());
    let Some(end) = find_crlf(&buf[..window]) else {
        if window == MAX_HEADER_LEN + CRLF.len() {
            return Err(ParseError::MessageTooLarge {
                size: buf.len(),
                max: MAX_HEADER_LEN,
            });
        }
        return Ok(None);
    };
    let digits = &buf[1..end];
    let n = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned()))?;

    buf.advance(end + CRLF.len());
    Ok(Some(n))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
