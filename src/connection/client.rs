//! Client Session
//!
//! One `Client` per accepted socket. It owns the raw input buffer, the
//! resumable parser state and the queue of encoded replies waiting to be
//! written.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. accept        -> Client::new, readable callback registered
//!        │
//!        ▼
//! 2. readable      -> read_from_socket (until WouldBlock)
//!        │            next_request / queue_reply for each complete request
//!        ▼
//! 3. replies queued -> writable callback registered
//!        │
//!        ▼
//! 4. writable      -> flush (until WouldBlock or queue empty)
//!        │            queue empty: writable callback removed
//!        ▼
//! 5. EOF / error / protocol violation -> both callbacks removed, Client dropped
//! ```
//!
//! Dropping a `Client` releases every `Value` it still holds (partial
//! arguments and unsent replies) and closes the socket.

use crate::protocol::{ParseError, RequestParser};
use crate::storage::Value;
use bytes::BytesMut;
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// Bytes requested from the socket per read call.
pub const READ_CHUNK: usize = 16 * 1024;

/// Initial input buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a client connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Request parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Input buffer size limit exceeded
    #[error("query buffer of {size} bytes exceeds limit of {max}")]
    BufferFull { size: usize, max: usize },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Outcome of draining a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes appended to the buffer
    pub bytes: usize,
    /// The peer closed its side
    pub eof: bool,
}

/// Reads from `reader` into `buf` until the read would block or hits EOF.
///
/// Fails with `BufferFull` once `buf` grows past `limit`.
pub fn read_into<R: Read>(reader: &mut R, buf: &mut BytesMut, limit: usize) -> ConnectionResult<ReadOutcome> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut total = 0;

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => {
                return Ok(ReadOutcome {
                    bytes: total,
                    eof: true,
                })
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                total += n;
                if buf.len() > limit {
                    return Err(ConnectionError::BufferFull {
                        size: buf.len(),
                        max: limit,
                    });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(ReadOutcome {
                    bytes: total,
                    eof: false,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Encoded replies waiting to be written, oldest first.
///
/// `sent_len` counts the bytes of the head reply already written, so a
/// partial write resumes exactly where it stopped.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    items: VecDeque<Value>,
    sent_len: usize,
}

impl ReplyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reply: Value) {
        self.items.push_back(reply);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bytes of the head reply already written.
    pub fn sent_len(&self) -> usize {
        self.sent_len
    }

    /// Bytes still to be written across all queued replies.
    pub fn pending_bytes(&self) -> usize {
        self.items.iter().map(Value::len).sum::<usize>() - self.sent_len
    }

    /// Writes queued replies in order until the queue is empty or the writer
    /// would block. Returns the number of bytes written.
    pub fn drain_into<W: Write>(&mut self, writer: &mut W) -> ConnectionResult<usize> {
        let mut written = 0;

        while let Some(head) = self.items.front() {
            let bytes = head.as_bytes();
            if self.sent_len >= bytes.len() {
                self.items.pop_front();
                self.sent_len = 0;
                continue;
            }

            match writer.write(&bytes[self.sent_len..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.sent_len += n;
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(written)
    }
}

/// Per-connection state.
#[derive(Debug)]
pub struct Client {
    fd: RawFd,
    addr: SocketAddr,
    stream: TcpStream,
    query_buf: BytesMut,
    parser: RequestParser,
    replies: ReplyQueue,
    close_after_reply: bool,
}

impl Client {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            addr,
            stream,
            query_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RequestParser::new(),
            replies: ReplyQueue::new(),
            close_after_reply: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bytes received but not yet consumed by the parser.
    pub fn buffered(&self) -> usize {
        self.query_buf.len()
    }

    /// Drains the socket into the input buffer.
    pub fn read_from_socket(&mut self, max_query_buffer: usize) -> ConnectionResult<ReadOutcome> {
        read_into(&mut self.stream, &mut self.query_buf, max_query_buffer)
    }

    /// Extracts the next complete request from the input buffer.
    ///
    /// Keeps parsing as long as the parser makes progress, so an empty
    /// request (`*0`) does not stall the requests pipelined behind it.
    pub fn next_request(&mut self) -> ConnectionResult<Option<Vec<Value>>> {
        loop {
            let before = self.query_buf.len();
            match self.parser.parse(&mut self.query_buf)? {
                Some(args) => return Ok(Some(args)),
                None if !self.query_buf.is_empty() && self.query_buf.len() < before => continue,
                None => return Ok(None),
            }
        }
    }

    pub fn queue_reply(&mut self, reply: Value) {
        self.replies.push(reply);
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.replies.is_empty()
    }

    pub fn replies(&self) -> &ReplyQueue {
        &self.replies
    }

    /// Writes as much of the reply queue as the socket accepts.
    pub fn flush(&mut self) -> ConnectionResult<usize> {
        self.replies.drain_into(&mut self.stream)
    }

    /// Marks the connection to be closed once its replies are written.
    pub fn close_after_reply(&mut self) {
        self.close_after_reply = true;
    }

    pub fn should_close(&self) -> bool {
        self.close_after_reply
    }
}
