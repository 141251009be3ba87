//! A threaded test server driven by a reactor on a dedicated worker thread.
//!
//! # Overview
//!
//! [`TestServer`] is the base for test-specific servers: it binds an
//! acceptor (retrying with fresh random ports when asked to pick its own),
//! then drives a [`Reactor`] on a worker thread until told to stop. The
//! owning thread and the worker communicate through exactly three things:
//!
//! - a running flag, written by the owner and read by the worker (benign
//!   race: it only ever transitions `true → false`, once),
//! - a [`Wakeup`] handle that interrupts the worker's blocking wait so a
//!   stop takes effect immediately instead of after the wake timeout,
//! - the accumulated connection-close conditions, written by the worker
//!   and read by the owner only after [`stop`](TestServer::stop) has
//!   joined the thread.
//!
//! `stop()` is the only cancellation path and it is synchronous: it blocks
//! the caller until the worker has fully exited, after which no further
//! events are processed.

use crate::ports::{EPHEMERAL_MAX, EPHEMERAL_MIN};
use crate::reactor::{Condition, Connection, Reactor, ReactorHandler, Wakeup};
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long one `process` call may block before re-checking the running
/// flag. The value is arbitrary; it only bounds idle-wait latency when a
/// wakeup is somehow missed.
const PROCESS_WAKE_TIMEOUT: Duration = Duration::from_millis(3142);

/// Bind attempts when the server picks its own port.
const BIND_RETRY_BUDGET: u32 = 10;

/// Owner-visible lifecycle of a [`TestServer`].
///
/// `Started`/`Stopping` of the full lifecycle are transient inside
/// [`start`](TestServer::start) and [`stop`](TestServer::stop) and never
/// observable from the owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, acceptor not yet bound.
    Created,
    /// Acceptor bound, worker thread running.
    Running,
    /// Worker thread joined; conditions are readable.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        };
        write!(f, "{}", str)
    }
}

/// Worker-thread event handler: applies the configured idle timeout to new
/// connections and accumulates termination conditions for the owner.
struct LoopHandler {
    idle_timeout: Option<Duration>,
    conditions: Vec<Option<Condition>>,
}

impl ReactorHandler for LoopHandler {
    fn on_connection_bound(&mut self, conn: &mut Connection) {
        if let Some(timeout) = self.idle_timeout {
            conn.set_idle_timeout(timeout);
        }
    }

    fn on_connection_local_close(&mut self, condition: Option<Condition>) {
        self.conditions.push(condition);
    }
}

/// A message server for tests, processing reactor events on its own thread.
///
/// # Lifecycle
///
/// `Created → start() → Running → stop() → Stopped`. Starting binds the
/// acceptor and launches the worker; stopping clears the running flag,
/// wakes the reactor, and joins the worker before returning.
///
/// # Example
///
/// ```rust,no_run
/// use wirepump::{TcpReactor, TestServer};
///
/// let mut server = TestServer::new();
/// server.start(TcpReactor::new());
/// let port = server.port();
/// // ... connect test clients to 127.0.0.1:port ...
/// server.stop();
/// assert!(server.conditions().is_empty());
/// ```
pub struct TestServer {
    host: String,
    port: u16,
    idle_timeout: Option<Duration>,
    running: Arc<AtomicBool>,
    wakeup: Option<Wakeup>,
    worker: Option<JoinHandle<Vec<Option<Condition>>>>,
    conditions: Vec<Option<Condition>>,
    state: ServerState,
}

impl TestServer {
    /// Creates a server that will listen on `127.0.0.1` and pick its own
    /// free port when started.
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            idle_timeout: None,
            running: Arc::new(AtomicBool::new(false)),
            wakeup: None,
            worker: None,
            conditions: Vec::new(),
            state: ServerState::Created,
        }
    }

    /// Sets the host to bind.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Sets an explicit port to bind. Port `0` (the default) makes
    /// [`start`](Self::start) select a random ephemeral port instead.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Arms a per-connection idle timeout, applied on the worker thread as
    /// each connection is bound.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// The host this server binds.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The bound port. Meaningful once the server has been started.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Owner-visible lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Termination conditions accumulated by the worker, one entry per
    /// locally-closed connection (`None` for a clean peer close).
    ///
    /// Only valid after [`stop`](Self::stop) has joined the worker;
    /// before that the slice is empty.
    pub fn conditions(&self) -> &[Option<Condition>] {
        &self.conditions
    }

    /// Binds the acceptor and launches the worker thread.
    ///
    /// With an explicit port, exactly that port is bound in a single
    /// attempt. With port `0`, random ephemeral ports are tried until one
    /// binds, up to a budget of ten attempts.
    ///
    /// # Panics
    ///
    /// Panics if already started, if an explicit port cannot be bound, or
    /// if the retry budget is exhausted without finding a free port; the
    /// server cannot exist without one.
    pub fn start<R>(&mut self, mut reactor: R)
    where
        R: Reactor + Send + 'static,
    {
        assert!(
            self.state == ServerState::Created,
            "server already started"
        );

        if self.port == 0 {
            let mut rng = rand::rng();
            let mut retry = BIND_RETRY_BUDGET;
            loop {
                let candidate = rng.random_range(EPHEMERAL_MIN..=EPHEMERAL_MAX);
                match reactor.acceptor(&self.host, candidate) {
                    Ok(bound) => {
                        self.port = bound;
                        break;
                    }
                    Err(err) => {
                        retry -= 1;
                        tracing::debug!(candidate, %err, retry, "bind attempt failed");
                        assert!(retry > 0, "no free port for server to listen on");
                    }
                }
            }
        } else {
            match reactor.acceptor(&self.host, self.port) {
                Ok(bound) => self.port = bound,
                Err(err) => panic!("failed to bind explicit port {}: {}", self.port, err),
            }
        }

        self.wakeup = Some(reactor.wakeup_handle());
        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let idle_timeout = self.idle_timeout;
        let worker = std::thread::Builder::new()
            .name("server-thread".to_string())
            .spawn(move || {
                let mut handler = LoopHandler {
                    idle_timeout,
                    conditions: Vec::new(),
                };
                while reactor.process(PROCESS_WAKE_TIMEOUT, &mut handler) {
                    if !running.load(Ordering::Relaxed) {
                        reactor.stop();
                        break;
                    }
                }
                tracing::debug!("server thread exiting");
                handler.conditions
            })
            .expect("failed to spawn server thread");

        self.worker = Some(worker);
        self.state = ServerState::Running;
        tracing::info!(host = %self.host, port = self.port, "test server running");
    }

    /// Stops the server: clears the running flag, wakes the reactor, and
    /// joins the worker thread. Blocks until the thread has fully exited;
    /// no events are processed afterward. The accumulated conditions
    /// become readable through [`conditions`](Self::conditions).
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::Relaxed);
        if let Some(wakeup) = &self.wakeup {
            wakeup.wake();
        }
        self.conditions = worker.join().expect("server thread panicked");
        self.state = ServerState::Stopped;
        tracing::info!(port = self.port, "test server stopped");
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // A server dropped while running still joins its worker.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::ports::free_tcp_port;
    use crate::reactor::TcpReactor;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Mutex;

    /// Scripted reactor: fails a configurable number of binds, counts
    /// `process` calls, and lets the test observe everything through a
    /// shared handle after the reactor has moved onto the worker thread.
    struct MockReactor {
        wakeup: Wakeup,
        wake_rx: flume::Receiver<()>,
        shared: Arc<Mutex<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        bind_failures_remaining: u32,
        attempted_ports: Vec<u16>,
        process_calls: u32,
        stopped: bool,
    }

    impl MockReactor {
        fn new(bind_failures: u32) -> (Self, Arc<Mutex<MockState>>) {
            let (wakeup, wake_rx) = Wakeup::channel();
            let shared = Arc::new(Mutex::new(MockState {
                bind_failures_remaining: bind_failures,
                ..Default::default()
            }));
            let reactor = Self {
                wakeup,
                wake_rx,
                shared: shared.clone(),
            };
            (reactor, shared)
        }
    }

    impl Reactor for MockReactor {
        fn acceptor(&mut self, host: &str, port: u16) -> Result<u16, HarnessError> {
            let mut state = self.shared.lock().unwrap();
            state.attempted_ports.push(port);
            if state.bind_failures_remaining > 0 {
                state.bind_failures_remaining -= 1;
                return Err(HarnessError::BindFailed {
                    host: Arc::from(host),
                    port,
                    reason: Arc::from("address in use (scripted)"),
                });
            }
            Ok(port)
        }

        fn process(
            &mut self,
            timeout: Duration,
            _handler: &mut dyn ReactorHandler,
        ) -> bool {
            {
                let mut state = self.shared.lock().unwrap();
                if state.stopped {
                    return false;
                }
                state.process_calls += 1;
            }
            let _ = self.wake_rx.recv_timeout(timeout);
            true
        }

        fn wakeup_handle(&self) -> Wakeup {
            self.wakeup.clone()
        }

        fn stop(&mut self) {
            self.shared.lock().unwrap().stopped = true;
        }
    }

    fn binding_allowed() -> bool {
        match TcpListener::bind("127.0.0.1:0") {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
            Err(e) => panic!("bind: {e}"),
        }
    }

    /// Opt-in log output: RUST_LOG=wirepump=debug cargo test -- --nocapture
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_explicit_port_binds_exactly_once() {
        let (reactor, shared) = MockReactor::new(0);
        let mut server = TestServer::new().with_port(54321);
        server.start(reactor);

        assert_eq!(server.port(), 54321);
        assert_eq!(shared.lock().unwrap().attempted_ports, vec![54321]);
        server.stop();
    }

    #[test]
    fn test_port_zero_retries_random_ports() {
        let (reactor, shared) = MockReactor::new(3);
        let mut server = TestServer::new();
        server.start(reactor);

        let state = shared.lock().unwrap();
        assert_eq!(state.attempted_ports.len(), 4);
        for &port in &state.attempted_ports {
            assert!(port >= EPHEMERAL_MIN);
        }
        assert_eq!(server.port(), *state.attempted_ports.last().unwrap());
        drop(state);
        server.stop();
    }

    #[test]
    #[should_panic(expected = "no free port for server to listen on")]
    fn test_retry_budget_exhaustion_is_fatal() {
        let (reactor, _shared) = MockReactor::new(u32::MAX);
        let mut server = TestServer::new();
        server.start(reactor);
    }

    #[test]
    fn test_stop_joins_worker_and_halts_processing() {
        let (reactor, shared) = MockReactor::new(0);
        let mut server = TestServer::new().with_port(54321);
        server.start(reactor);
        assert_eq!(server.state(), ServerState::Running);

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(shared.lock().unwrap().stopped);

        // No events are processed after stop() has returned
        let calls = shared.lock().unwrap().process_calls;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(shared.lock().unwrap().process_calls, calls);

        // Stopping again is a no-op
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_real_server_binds_explicit_free_port() {
        if !binding_allowed() {
            return;
        }
        init_tracing();
        let port = free_tcp_port();
        let mut server = TestServer::new().with_port(port);
        server.start(TcpReactor::new());
        assert_eq!(server.port(), port);

        // The acceptor is live on exactly that port
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        drop(client);
        server.stop();
    }

    #[test]
    fn test_real_server_picks_its_own_port() {
        if !binding_allowed() {
            return;
        }
        let mut server = TestServer::new();
        server.start(TcpReactor::new());
        assert!(server.port() >= EPHEMERAL_MIN);

        let client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        drop(client);
        server.stop();
    }

    #[test]
    fn test_clean_peer_close_recorded_as_condition() {
        if !binding_allowed() {
            return;
        }
        let mut server = TestServer::new();
        server.start(TcpReactor::new());

        let client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        drop(client);
        // Give the worker a moment to observe the close
        std::thread::sleep(Duration::from_millis(200));

        server.stop();
        assert_eq!(server.conditions(), &[None]);
    }

    #[test]
    fn test_idle_timeout_condition_reaches_owner() {
        if !binding_allowed() {
            return;
        }
        init_tracing();
        let mut server = TestServer::new().with_idle_timeout(Duration::from_millis(50));
        server.start(TcpReactor::new());

        // Connect and stay silent past the idle window
        let _client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        std::thread::sleep(Duration::from_millis(400));

        server.stop();
        assert_eq!(server.conditions().len(), 1);
        let condition = server.conditions()[0]
            .as_ref()
            .expect("idle expiry carries a condition");
        assert_eq!(&*condition.name, "resource-limit-exceeded");
        assert_eq!(&*condition.description, "local-idle-timeout expired");
    }
}
