//! Server
//!
//! `Server` is the state every event-loop callback receives: the listening
//! socket, the client table, the database and the counters. It installs three
//! kinds of callbacks:
//!
//! ```text
//!   listener readable ──> accept_handler ──> Client + readable callback
//!   client readable   ──> read_handler   ──> parse, execute, queue replies
//!                                             (+ writable callback)
//!   client writable   ──> write_handler  ──> drain replies
//!                                             (- writable callback when empty)
//!   cron (Cycle)      ──> server_cron    ──> active expiry, shutdown check
//! ```
//!
//! A client holds a writable registration only while it has queued replies.

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{Client, ConnectionError, ConnectionStats};
use crate::event::{Direction, EventLoop, EventLoopError, TimerId, TimerKind};
use crate::storage::Db;
use mio::net::TcpListener;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("event loop error: {0}")]
    EventLoop(#[from] EventLoopError),
}

/// Requests a running server to stop from another thread.
///
/// The flag is checked by the server cron, so the loop stops within one cron
/// interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The server context.
pub struct Server {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    clients: HashMap<RawFd, Client>,
    db: Db,
    commands: CommandHandler,
    stats: ConnectionStats,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the address named by the configuration.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let listener = std::net::TcpListener::bind(config.bind_addr())?;
        Self::from_std(listener, config)
    }

    /// Wraps an already bound listener.
    pub fn from_std(listener: std::net::TcpListener, config: Config) -> Result<Self, ServerError> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        Ok(Self {
            config,
            listener,
            local_addr,
            clients: HashMap::new(),
            db: Db::new(),
            commands: CommandHandler::new(),
            stats: ConnectionStats::new(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Uses `handle` to receive shutdown requests.
    pub fn with_shutdown(mut self, handle: ShutdownHandle) -> Self {
        self.shutdown = handle;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registers the accept callback and the cron timer.
    pub fn install(&self, el: &mut EventLoop<Server>) -> Result<TimerId, ServerError> {
        el.register_file(self.listener.as_raw_fd(), Direction::Readable, |el, srv| {
            srv.accept_handler(el)
        })?;

        let cron = el.schedule_timer(self.config.cron_interval_ms as i64, TimerKind::Cycle, |el, srv, _| {
            srv.server_cron(el)
        });
        Ok(cron)
    }

    /// Runs the event loop until shutdown is requested or polling fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut el = EventLoop::with_capacity(self.config.max_events)?;
        self.install(&mut el)?;

        info!(addr = %self.local_addr, "minikv listening");
        let result = el.run(self);

        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            self.free_client(&mut el, fd);
        }
        info!("minikv stopped");

        result.map_err(ServerError::from)
    }

    /// Accepts every pending connection.
    fn accept_handler(&mut self, el: &mut EventLoop<Server>) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(client = %addr, error = %e, "failed to set TCP_NODELAY");
                    }
                    let client = Client::new(stream, addr);
                    let fd = client.fd();

                    let registered = el.register_file(fd, Direction::Readable, move |el, srv| {
                        srv.read_handler(el, fd)
                    });
                    if let Err(e) = registered {
                        warn!(client = %addr, error = %e, "failed to register client");
                        continue;
                    }

                    self.clients.insert(fd, client);
                    self.stats.connection_opened();
                    info!(client = %addr, fd, "client connected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Reads what the socket has, executes every complete request and
    /// arranges for the replies to be written.
    fn read_handler(&mut self, el: &mut EventLoop<Server>, fd: RawFd) {
        let max_query_buffer = self.config.max_query_buffer;
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };
        let addr = client.addr();

        let outcome = match client.read_from_socket(max_query_buffer) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(client = %addr, error = %e, "read failed, closing connection");
                self.free_client(el, fd);
                return;
            }
        };
        self.stats.bytes_read(outcome.bytes);
        trace!(client = %addr, bytes = outcome.bytes, "read data");

        if let Err(e) = self.process_input(fd) {
            warn!(client = %addr, error = %e, "protocol error, closing connection");
            self.free_client(el, fd);
            return;
        }

        if outcome.eof {
            if let Some(client) = self.clients.get_mut(&fd) {
                if let Ok(n) = client.flush() {
                    self.stats.bytes_written(n);
                }
            }
            info!(client = %addr, "client disconnected");
            self.free_client(el, fd);
            return;
        }

        self.watch_writable(el, fd);
    }

    /// Executes every complete request buffered by the client, in order.
    fn process_input(&mut self, fd: RawFd) -> Result<(), ConnectionError> {
        let Some(client) = self.clients.get_mut(&fd) else {
            return Ok(());
        };

        // Input after QUIT is ignored.
        while !client.should_close() {
            let Some(args) = client.next_request()? else {
                break;
            };
            let outcome = self.commands.execute(&mut self.db, &args);
            self.stats.command_processed();
            client.queue_reply(outcome.reply.into_value());
            if outcome.close {
                client.close_after_reply();
            }
        }

        if client.buffered() > 0 {
            trace!(fd, buffered = client.buffered(), "incomplete request, waiting for more data");
        }
        Ok(())
    }

    /// Registers the writable callback if replies are waiting.
    fn watch_writable(&mut self, el: &mut EventLoop<Server>, fd: RawFd) {
        let pending = self
            .clients
            .get(&fd)
            .is_some_and(|client| client.has_pending_replies());
        if !pending || el.has_file_event(fd, Direction::Writable) {
            return;
        }

        let registered = el.register_file(fd, Direction::Writable, move |el, srv| srv.write_handler(el, fd));
        if let Err(e) = registered {
            warn!(fd, error = %e, "failed to watch writability, closing connection");
            self.free_client(el, fd);
        }
    }

    /// Drains the reply queue; stops watching writability once it is empty.
    fn write_handler(&mut self, el: &mut EventLoop<Server>, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };

        match client.flush() {
            Ok(n) => {
                self.stats.bytes_written(n);
                trace!(client = %client.addr(), bytes = n, "wrote replies");
            }
            Err(e) => {
                warn!(client = %client.addr(), error = %e, "write failed, closing connection");
                self.free_client(el, fd);
                return;
            }
        }

        if client.has_pending_replies() {
            return;
        }
        if client.should_close() {
            debug!(client = %client.addr(), "closing connection after reply");
            self.free_client(el, fd);
            return;
        }
        if let Err(e) = el.unregister_file(fd, Direction::Writable) {
            warn!(fd, error = %e, "failed to unwatch writability, closing connection");
            self.free_client(el, fd);
        }
    }

    /// Removes both registrations and drops the client, closing its socket.
    fn free_client(&mut self, el: &mut EventLoop<Server>, fd: RawFd) {
        for dir in [Direction::Readable, Direction::Writable] {
            if let Err(e) = el.unregister_file(fd, dir) {
                debug!(fd, error = %e, "failed to unregister client");
            }
        }

        if let Some(client) = self.clients.remove(&fd) {
            self.stats.connection_closed();
            debug!(client = %client.addr(), fd, "client freed");
        }
    }

    /// Periodic housekeeping.
    fn server_cron(&mut self, el: &mut EventLoop<Server>) {
        if self.shutdown.is_shutdown() {
            info!("shutdown requested");
            el.stop();
            return;
        }

        let removed = self.db.active_expire_cycle(self.config.expire_samples);
        if removed > 0 {
            debug!(removed, remaining = self.db.expires_len(), "expired keys");
        }
    }
}
