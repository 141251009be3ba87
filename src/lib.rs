//! In-process duplex transport pump for sans-IO protocol engines.
//!
//! This library moves bytes between two protocol engines without real
//! sockets, faithfully reproducing the backpressure, half-close, and
//! termination semantics of a real network link, plus the scaffolding a
//! test suite built on it needs: a threaded test server, free-port
//! discovery, and explicit fixture configuration.
//!
//! # Overview
//!
//! An [`Engine`] is an opaque protocol endpoint exposing pull-based
//! buffered output and capacity-limited input. The [`pump`] repeatedly
//! shuttles bytes between two engines until neither direction can make
//! progress, propagating end-of-stream in each direction the way a closing
//! socket would:
//!
//! ```text
//! ┌────────────┐  peek/consume          push  ┌────────────┐
//! │  Engine A  │────────────►  pump  ────────►│  Engine B  │
//! │ (sans-IO)  │◄────────────  pump  ◄────────│ (sans-IO)  │
//! └────────────┘  push          peek/consume  └────────────┘
//! ```
//!
//! The pump holds no buffers of its own and never blocks: every transfer is
//! bounded by the destination's reported capacity and a caller-supplied
//! buffer size, which is the backpressure mechanism: a slow consumer
//! throttles how much its producer can push per round.
//!
//! # Example
//!
//! ```rust
//! use wirepump::{pump, MemoryEngine, DEFAULT_BUFFER_SIZE};
//!
//! let mut client = MemoryEngine::new(256);
//! let mut server = MemoryEngine::new(256);
//!
//! client.stage_output(b"request");
//! server.stage_output(b"response");
//!
//! pump(&mut client, &mut server, DEFAULT_BUFFER_SIZE);
//!
//! assert_eq!(&server.take_input()[..], b"request");
//! assert_eq!(&client.take_input()[..], b"response");
//! ```
//!
//! # Test Scaffolding
//!
//! - [`TestServer`] drives a [`Reactor`] on a dedicated worker thread with
//!   flag-and-wakeup cancellation, accumulating connection-close
//!   conditions for inspection after [`TestServer::stop`].
//! - [`free_tcp_ports`] hands out distinct, currently-unbound ephemeral
//!   ports for acceptors and subprocess fixtures.
//! - [`FixtureConfig`] makes optional external-tool dependencies explicit,
//!   reporting a distinct skipped outcome when a prerequisite is absent.

pub mod engine;
pub mod error;
pub mod fixture;
pub mod ports;
pub mod pump;
pub mod reactor;
pub mod server;

pub use engine::{Engine, MemoryEngine, Window};
pub use error::HarnessError;
pub use fixture::FixtureConfig;
pub use ports::{free_tcp_port, free_tcp_ports};
pub use pump::{pump, pump_unidirectional, DEFAULT_BUFFER_SIZE};
pub use reactor::{Condition, Connection, Reactor, ReactorHandler, TcpReactor, Wakeup};
pub use server::{ServerState, TestServer};
