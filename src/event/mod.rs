//! Event Loop
//!
//! A single-threaded reactor that multiplexes socket readiness and timers.
//! Everything the server does runs inside a callback invoked from here.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        EventLoop<S>                           │
//! │                                                               │
//! │   file_events: fd -> { readable, writable }   (mio Poll)      │
//! │   timers:      [ (id, when, interval, kind, proc) ... ]       │
//! │                                                               │
//! │   run_once:                                                   │
//! │     1. budget = earliest deadline - now (10ms fallback)       │
//! │     2. poll(budget), retried on EINTR                         │
//! │     3. collect file callbacks (readable before writable)      │
//! │     4. collect due timers                                     │
//! │     5. run timers, then file callbacks                        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks receive the loop itself and the shared state `S`, so they can
//! register or cancel events while running. The fd a file callback serves is
//! captured by the closure at registration time.
//!
//! ## Readiness
//!
//! mio readiness is edge-triggered: a callback must keep reading (or
//! accepting, or writing) until the call would block, or it will not be
//! woken again for data that is already pending.

pub mod timer;

pub use timer::{TimeProc, TimerId, TimerKind, MIN_INTERVAL};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use timer::{interval_from_millis, Timers};
use tracing::{error, trace};

/// Default number of readiness events fetched per wait.
pub const DEFAULT_MAX_EVENTS: usize = 64;

/// Callback invoked when a registered fd becomes ready.
pub type FileProc<S> = Rc<dyn Fn(&mut EventLoop<S>, &mut S)>;

/// Readiness direction of a file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Readable,
    Writable,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Readable => Interest::READABLE,
            Direction::Writable => Interest::WRITABLE,
        }
    }
}

/// Errors raised by the reactor.
#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("failed to create poller: {0}")]
    Create(#[source] io::Error),

    #[error("failed to register fd {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to deregister fd {fd}: {source}")]
    Deregister {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
}

struct FileEvent<S> {
    readable: Option<FileProc<S>>,
    writable: Option<FileProc<S>>,
}

impl<S> FileEvent<S> {
    fn slot(&mut self, dir: Direction) -> &mut Option<FileProc<S>> {
        match dir {
            Direction::Readable => &mut self.readable,
            Direction::Writable => &mut self.writable,
        }
    }

    /// Union of the registered directions.
    fn interest(&self) -> Option<Interest> {
        match (self.readable.is_some(), self.writable.is_some()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// The interest left once `dir` is dropped.
    fn interest_without(&self, dir: Direction) -> Option<Interest> {
        match dir {
            Direction::Readable => self.writable.as_ref().map(|_| Interest::WRITABLE),
            Direction::Writable => self.readable.as_ref().map(|_| Interest::READABLE),
        }
    }
}

/// The reactor, generic over the state handed to every callback.
pub struct EventLoop<S> {
    poll: Poll,
    events: Events,
    file_events: HashMap<RawFd, FileEvent<S>>,
    timers: Timers<S>,
    stop: bool,
}

impl<S> EventLoop<S> {
    pub fn new() -> Result<Self, EventLoopError> {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Creates a loop that fetches at most `max_events` readiness events per wait.
    pub fn with_capacity(max_events: usize) -> Result<Self, EventLoopError> {
        let poll = Poll::new().map_err(EventLoopError::Create)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(max_events.max(1)),
            file_events: HashMap::new(),
            timers: Timers::new(),
            stop: false,
        })
    }

    /// Installs `proc` for `(fd, dir)`, replacing any previous callback for
    /// that pair. The fd's OS interest becomes the union of its directions.
    pub fn register_file<F>(&mut self, fd: RawFd, dir: Direction, proc: F) -> Result<(), EventLoopError>
    where
        F: Fn(&mut EventLoop<S>, &mut S) + 'static,
    {
        let token = Token(fd as usize);
        let registry = self.poll.registry();
        let proc: FileProc<S> = Rc::new(proc);

        match self.file_events.get_mut(&fd) {
            Some(fe) => {
                let interest = match fe.interest() {
                    Some(current) => current | dir.interest(),
                    None => dir.interest(),
                };
                registry
                    .reregister(&mut SourceFd(&fd), token, interest)
                    .map_err(|source| EventLoopError::Register { fd, source })?;
                *fe.slot(dir) = Some(proc);
            }
            None => {
                registry
                    .register(&mut SourceFd(&fd), token, dir.interest())
                    .map_err(|source| EventLoopError::Register { fd, source })?;
                let mut fe = FileEvent {
                    readable: None,
                    writable: None,
                };
                *fe.slot(dir) = Some(proc);
                self.file_events.insert(fd, fe);
            }
        }

        trace!(fd, ?dir, "file event registered");
        Ok(())
    }

    /// Removes the callback for `(fd, dir)`. No-op if it is not registered.
    ///
    /// The OS interest is updated first; on failure the registration is left
    /// as it was.
    pub fn unregister_file(&mut self, fd: RawFd, dir: Direction) -> Result<(), EventLoopError> {
        let Some(fe) = self.file_events.get_mut(&fd) else {
            return Ok(());
        };
        if fe.slot(dir).is_none() {
            return Ok(());
        }

        let registry = self.poll.registry();
        match fe.interest_without(dir) {
            Some(interest) => {
                registry
                    .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
                    .map_err(|source| EventLoopError::Deregister { fd, source })?;
                *fe.slot(dir) = None;
            }
            None => {
                registry
                    .deregister(&mut SourceFd(&fd))
                    .map_err(|source| EventLoopError::Deregister { fd, source })?;
                self.file_events.remove(&fd);
            }
        }

        trace!(fd, ?dir, "file event unregistered");
        Ok(())
    }

    pub fn has_file_event(&self, fd: RawFd, dir: Direction) -> bool {
        self.file_events.get(&fd).is_some_and(|fe| match dir {
            Direction::Readable => fe.readable.is_some(),
            Direction::Writable => fe.writable.is_some(),
        })
    }

    /// Number of fds with at least one registered direction.
    pub fn file_event_count(&self) -> usize {
        self.file_events.len()
    }

    /// Schedules `proc` to run after `interval_ms` milliseconds, once or
    /// repeatedly. Non-positive intervals are clamped to 10ms.
    pub fn schedule_timer<F>(&mut self, interval_ms: i64, kind: TimerKind, proc: F) -> TimerId
    where
        F: Fn(&mut EventLoop<S>, &mut S, TimerId) + 'static,
    {
        let interval = interval_from_millis(interval_ms);
        let id = self
            .timers
            .schedule(Instant::now(), interval, kind, Rc::new(proc));
        trace!(timer = %id, ?kind, ?interval, "timer scheduled");
        id
    }

    /// Removes a timer. Safe to call from the timer's own callback.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    /// Runs one wait/dispatch iteration and returns the number of callbacks
    /// invoked.
    ///
    /// A poll failure stops the loop. Timers collected in that iteration
    /// still run before the error is returned.
    pub fn run_once(&mut self, state: &mut S) -> Result<usize, EventLoopError> {
        let budget = self.timers.wait_budget(Instant::now());

        let mut failure = None;
        loop {
            match self.poll.poll(&mut self.events, Some(budget)) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "poll failed, stopping event loop");
                    self.events.clear();
                    self.stop = true;
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut ready: Vec<FileProc<S>> = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            let Some(fe) = self.file_events.get(&fd) else {
                continue;
            };
            // Errors and hang-ups are delivered to the handlers so the
            // following read or write reports them.
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();
            if readable {
                if let Some(proc) = &fe.readable {
                    ready.push(Rc::clone(proc));
                }
            }
            if writable {
                if let Some(proc) = &fe.writable {
                    ready.push(Rc::clone(proc));
                }
            }
        }

        let due = self.timers.due(Instant::now());
        let mut invoked = 0;

        for (id, proc) in due {
            // Cancelled by an earlier callback of this iteration.
            if !self.timers.contains(id) {
                continue;
            }
            proc(self, state, id);
            self.timers.fired(id, Instant::now());
            invoked += 1;
        }

        for proc in ready {
            proc(self, state);
            invoked += 1;
        }

        match failure {
            Some(source) => Err(EventLoopError::Poll(source)),
            None => Ok(invoked),
        }
    }

    /// Runs iterations until [`EventLoop::stop`] is called or polling fails.
    pub fn run(&mut self, state: &mut S) -> Result<(), EventLoopError> {
        self.stop = false;
        while !self.stop {
            self.run_once(state)?;
        }
        Ok(())
    }
}

impl<S> fmt::Debug for EventLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("file_events", &self.file_events.len())
            .field("timers", &self.timers.len())
            .field("stop", &self.stop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[derive(Default)]
    struct Fired {
        timers: Vec<TimerId>,
        files: Vec<&'static str>,
    }

    fn count(fired: &Fired, id: TimerId) -> usize {
        fired.timers.iter().filter(|t| **t == id).count()
    }

    #[test]
    fn test_cancelled_cycle_timer_never_fires() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        let record = |_: &mut EventLoop<Fired>, f: &mut Fired, id: TimerId| f.timers.push(id);
        let first = el.schedule_timer(5, TimerKind::Cycle, record);
        let second = el.schedule_timer(5, TimerKind::Cycle, record);
        let third = el.schedule_timer(5, TimerKind::Cycle, record);
        assert_eq!(el.timer_count(), 3);

        assert!(el.cancel_timer(first));
        assert_eq!(el.timer_count(), 2);

        for _ in 0..200 {
            el.run_once(&mut fired).unwrap();
            if count(&fired, second) >= 2 && count(&fired, third) >= 2 {
                break;
            }
        }

        assert_eq!(count(&fired, first), 0);
        assert!(count(&fired, second) >= 2);
        assert!(count(&fired, third) >= 2);
        assert_eq!(el.timer_count(), 2);
    }

    #[test]
    fn test_once_timer_fires_once() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        let id = el.schedule_timer(1, TimerKind::Once, |_, f: &mut Fired, id| f.timers.push(id));

        for _ in 0..10 {
            el.run_once(&mut fired).unwrap();
        }

        assert_eq!(fired.timers, vec![id]);
        assert_eq!(el.timer_count(), 0);
        assert!(!el.cancel_timer(id));
    }

    #[test]
    fn test_cycle_timer_cancels_itself() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        el.schedule_timer(1, TimerKind::Cycle, |el: &mut EventLoop<Fired>, f: &mut Fired, id| {
            f.timers.push(id);
            el.cancel_timer(id);
        });

        for _ in 0..10 {
            el.run_once(&mut fired).unwrap();
        }

        assert_eq!(fired.timers.len(), 1);
        assert_eq!(el.timer_count(), 0);
    }

    #[test]
    fn test_stop_from_timer() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        el.schedule_timer(1, TimerKind::Once, |el: &mut EventLoop<Fired>, _: &mut Fired, _| el.stop());
        el.run(&mut fired).unwrap();
        assert!(el.is_stopped());
    }

    #[test]
    fn test_readable_callback() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();

        el.register_file(a.as_raw_fd(), Direction::Readable, |_, f: &mut Fired| {
            f.files.push("readable")
        })
        .unwrap();

        el.run_once(&mut fired).unwrap();
        assert!(fired.files.is_empty());

        b.write_all(b"ping").unwrap();
        for _ in 0..10 {
            el.run_once(&mut fired).unwrap();
            if !fired.files.is_empty() {
                break;
            }
        }
        assert_eq!(fired.files, vec!["readable"]);

        el.unregister_file(a.as_raw_fd(), Direction::Readable).unwrap();
        assert_eq!(el.file_event_count(), 0);
    }

    #[test]
    fn test_readable_runs_before_writable() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let mut fired = Fired::default();

        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.write_all(b"x").unwrap();

        let fd = a.as_raw_fd();
        el.register_file(fd, Direction::Writable, |_, f: &mut Fired| f.files.push("writable"))
            .unwrap();
        el.register_file(fd, Direction::Readable, |_, f: &mut Fired| f.files.push("readable"))
            .unwrap();

        for _ in 0..10 {
            el.run_once(&mut fired).unwrap();
            if !fired.files.is_empty() {
                break;
            }
        }
        assert_eq!(fired.files, vec!["readable", "writable"]);
    }

    #[test]
    fn test_interest_mask_tracks_directions() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        el.register_file(fd, Direction::Readable, |_, _| {}).unwrap();
        el.register_file(fd, Direction::Writable, |_, _| {}).unwrap();
        assert!(el.has_file_event(fd, Direction::Readable));
        assert!(el.has_file_event(fd, Direction::Writable));

        el.unregister_file(fd, Direction::Readable).unwrap();
        assert!(!el.has_file_event(fd, Direction::Readable));
        assert!(el.has_file_event(fd, Direction::Writable));
        assert_eq!(el.file_event_count(), 1);

        el.unregister_file(fd, Direction::Writable).unwrap();
        assert_eq!(el.file_event_count(), 0);

        // Unregistering something that is not there is a no-op.
        el.unregister_file(fd, Direction::Writable).unwrap();
        el.unregister_file(12345, Direction::Readable).unwrap();
    }

    #[test]
    fn test_register_bad_fd_fails() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let result = el.register_file(1_000_000, Direction::Readable, |_, _| {});
        assert!(matches!(result, Err(EventLoopError::Register { fd: 1_000_000, .. })));
        assert_eq!(el.file_event_count(), 0);
    }

    #[test]
    fn test_failed_unregister_keeps_registration() {
        let mut el = EventLoop::<Fired>::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        el.register_file(fd, Direction::Readable, |_, _| {}).unwrap();
        el.register_file(fd, Direction::Writable, |_, _| {}).unwrap();
        // Closing the fd makes every further poller update fail.
        drop(a);

        let result = el.unregister_file(fd, Direction::Writable);
        assert!(matches!(result, Err(EventLoopError::Deregister { .. })));
        assert!(el.has_file_event(fd, Direction::Readable));
        assert!(el.has_file_event(fd, Direction::Writable));

        el.unregister_file(fd, Direction::Readable).unwrap_err();
        assert!(el.has_file_event(fd, Direction::Readable));
        assert_eq!(el.file_event_count(), 1);
    }
}
