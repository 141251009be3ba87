//! The reactor capability set consumed by the test server loop.
//!
//! # Overview
//!
//! A [`Reactor`] owns an acceptor and a set of live connections, and is
//! driven from a single worker thread through repeated calls to
//! [`Reactor::process`]: a blocking wait with a wake-up timeout that
//! dispatches connection events to a [`ReactorHandler`] before returning.
//! A cloneable [`Wakeup`] handle lets another thread interrupt the wait
//! immediately instead of riding out the timeout, which is the
//! flag-and-wakeup cancellation idiom the server loop is built on.
//!
//! [`TcpReactor`] is the concrete implementation: a non-blocking `std::net`
//! listener polled in short slices, with per-connection idle-timeout
//! deadlines and peer-close detection. It is deliberately a test-server
//! reactor, not a production event loop: received payload bytes are drained
//! and discarded, and the blocking wait is a sliced poll rather than an OS
//! readiness queue.
//!
//! # Threading
//!
//! All [`ReactorHandler`] callbacks run on whichever thread calls
//! `process`; for the server loop, that is always the worker thread.
//! Only [`Wakeup`] may be touched from other threads.

use crate::error::HarnessError;
use coarsetime::{Duration as IdleDuration, Instant};
use std::fmt;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// How long one slice of the sliced blocking wait lasts. Accepts and
/// idle-timeout checks happen once per slice.
const POLL_SLICE: Duration = Duration::from_millis(10);

/// A connection termination condition, recorded when a connection is
/// closed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Symbolic name, e.g. `resource-limit-exceeded`
    pub name: Arc<str>,
    /// Human-readable description
    pub description: Arc<str>,
}

impl Condition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: Arc::from(name),
            description: Arc::from(description),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

/// Per-connection state handed to [`ReactorHandler::on_connection_bound`].
///
/// The handler's one configuration hook is [`set_idle_timeout`]: a
/// connection that stays silent past its deadline is closed locally with a
/// `resource-limit-exceeded` condition. Any received byte pushes the
/// deadline out again.
///
/// [`set_idle_timeout`]: Self::set_idle_timeout
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    /// Deadline after which the connection is considered idle-expired
    idle_deadline: Option<Instant>,
    /// Configured idle window, used to refresh the deadline on activity
    idle_timeout: Option<IdleDuration>,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            idle_deadline: None,
            idle_timeout: None,
        }
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Arms the idle timeout for this connection. Called from
    /// `on_connection_bound`; a connection without one never expires.
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        let window = IdleDuration::from_millis(timeout.as_millis() as u64);
        self.idle_timeout = Some(window);
        self.idle_deadline = Some(Instant::now() + window);
    }

    /// Pushes the idle deadline out after activity.
    fn touch(&mut self, now: Instant) {
        if let Some(window) = self.idle_timeout {
            self.idle_deadline = Some(now + window);
        }
    }
}

/// Event callbacks dispatched by [`Reactor::process`].
///
/// Both callbacks run on the thread driving the reactor, never concurrently
/// with each other.
pub trait ReactorHandler {
    /// A new connection has been accepted and bound. The handler may
    /// configure it (e.g. arm an idle timeout) before it goes live.
    fn on_connection_bound(&mut self, _conn: &mut Connection) {}

    /// A connection was closed locally. `condition` is `None` for a clean
    /// peer close, or names the reason the reactor closed it.
    fn on_connection_local_close(&mut self, _condition: Option<Condition>) {}
}

/// Cloneable handle that interrupts a blocking [`Reactor::process`] call.
///
/// Waking is idempotent and never blocks: the underlying channel holds at
/// most one pending wake, and further wakes before the reactor observes it
/// are coalesced.
#[derive(Debug, Clone)]
pub struct Wakeup {
    tx: flume::Sender<()>,
}

impl Wakeup {
    /// Creates a wakeup handle together with the receiver a reactor
    /// implementation blocks on. Capacity is one, so wakes coalesce
    /// instead of queueing.
    pub fn channel() -> (Wakeup, flume::Receiver<()>) {
        let (tx, rx) = flume::bounded(1);
        (Wakeup { tx }, rx)
    }

    /// Wakes the reactor if it is blocked in `process`, or makes the next
    /// `process` call return promptly if it is not.
    pub fn wake(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The capability set the server loop consumes.
///
/// `process` returning `false` signals the reactor has no more work and the
/// driving loop should exit; [`TcpReactor`] only does so after [`stop`].
///
/// [`stop`]: Self::stop
pub trait Reactor {
    /// Binds an acceptor to `host:port` and returns the bound port.
    ///
    /// Bind failure is recoverable: the caller may retry with a different
    /// port.
    fn acceptor(&mut self, host: &str, port: u16) -> Result<u16, HarnessError>;

    /// Processes the next batch of events, blocking up to `timeout` (or
    /// until woken), and returns whether the reactor still has work.
    fn process(&mut self, timeout: Duration, handler: &mut dyn ReactorHandler) -> bool;

    /// Returns a handle that interrupts a blocked `process` call from
    /// another thread.
    fn wakeup_handle(&self) -> Wakeup;

    /// Closes the acceptor and drops all live connections. After this,
    /// `process` returns `false` and no further events are dispatched.
    fn stop(&mut self);
}

/// A [`Reactor`] over a non-blocking TCP listener.
pub struct TcpReactor {
    wakeup: Wakeup,
    wake_rx: flume::Receiver<()>,
    listener: Option<TcpListener>,
    connections: Vec<Connection>,
    stopped: bool,
}

impl TcpReactor {
    pub fn new() -> Self {
        let (wakeup, wake_rx) = Wakeup::channel();
        Self {
            wakeup,
            wake_rx,
            listener: None,
            connections: Vec::new(),
            stopped: false,
        }
    }

    /// Drains the accept queue, binding each new connection through the
    /// handler before it joins the live set.
    fn accept_pending(&mut self, handler: &mut dyn ReactorHandler) {
        let mut accepted = Vec::new();
        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nonblocking(true) {
                            tracing::warn!(%peer, %err, "failed to set connection non-blocking");
                            continue;
                        }
                        accepted.push(Connection::new(stream, peer));
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        break;
                    }
                }
            }
        }
        for mut conn in accepted {
            tracing::info!(peer = %conn.peer, "connection bound");
            handler.on_connection_bound(&mut conn);
            self.connections.push(conn);
        }
    }

    /// Services every live connection once: expires idle deadlines, drains
    /// and discards received bytes, and detects peer closes.
    fn poll_connections(&mut self, handler: &mut dyn ReactorHandler) {
        let now = Instant::now();
        let mut buf = [0u8; 4096];
        let mut i = 0;
        while i < self.connections.len() {
            let conn = &mut self.connections[i];

            if let Some(deadline) = conn.idle_deadline {
                if deadline < now {
                    tracing::info!(peer = %conn.peer, "local idle timeout expired");
                    handler.on_connection_local_close(Some(Condition::new(
                        "resource-limit-exceeded",
                        "local-idle-timeout expired",
                    )));
                    self.connections.swap_remove(i);
                    continue;
                }
            }

            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(peer = %conn.peer, "peer closed connection");
                    handler.on_connection_local_close(None);
                    self.connections.swap_remove(i);
                    continue;
                }
                Ok(n) => {
                    tracing::trace!(peer = %conn.peer, n, "discarding received bytes");
                    conn.touch(now);
                    i += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    i += 1;
                }
                Err(err) => {
                    tracing::warn!(peer = %conn.peer, %err, "connection error");
                    handler.on_connection_local_close(Some(Condition::new(
                        "io",
                        &err.to_string(),
                    )));
                    self.connections.swap_remove(i);
                    continue;
                }
            }
        }
    }
}

impl Default for TcpReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for TcpReactor {
    fn acceptor(&mut self, host: &str, port: u16) -> Result<u16, HarnessError> {
        let listener = TcpListener::bind((host, port)).map_err(|err| HarnessError::BindFailed {
            host: Arc::from(host),
            port,
            reason: Arc::from(err.to_string()),
        })?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?.port();
        tracing::info!(host, port = bound, "acceptor bound");
        self.listener = Some(listener);
        Ok(bound)
    }

    fn process(&mut self, timeout: Duration, handler: &mut dyn ReactorHandler) -> bool {
        if self.stopped {
            return false;
        }

        let deadline = std::time::Instant::now() + timeout;
        loop {
            self.accept_pending(handler);
            self.poll_connections(handler);

            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            match self.wake_rx.recv_timeout(POLL_SLICE.min(deadline - now)) {
                // Explicit wakeup: hand control back to the driving loop
                // so it can observe its running flag right away.
                Ok(()) => break,
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }
        true
    }

    fn wakeup_handle(&self) -> Wakeup {
        self.wakeup.clone()
    }

    fn stop(&mut self) {
        if self.listener.take().is_some() {
            tracing::info!("acceptor closed");
        }
        // Connections abandoned here are dropped without close events:
        // the loop has already decided to exit and must not dispatch more.
        self.connections.clear();
        self.stopped = true;
    }
}
