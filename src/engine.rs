//! The pumpable-engine contract and an in-memory implementation.
//!
//! This module defines [`Engine`], the entire surface a protocol engine must
//! expose to be driven by the pump: pull-based buffered output, capacity-
//! limited input, and a permanent close signal for each direction.
//!
//! # Design Philosophy
//!
//! Engines here are **sans-IO**: every operation is an in-memory buffer
//! operation that never blocks and never suspends. The pump composes two
//! engines without owning either of them, and all abnormal conditions flow
//! through [`Window::Closed`] rather than through errors; a closed
//! direction stays closed forever.
//!
//! [`MemoryEngine`] is the standard implementation: a pair of byte buffers
//! with a bounded input side. It serves both as a loopback endpoint and as
//! the test double the pump's own tests are written against.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

/// Availability reading for one direction of an engine.
///
/// Wire protocols that report byte counts as signed integers use a negative
/// value to mean "this direction is permanently closed"; `Window` is that
/// contract with the invalid states made unrepresentable. A reading of
/// `Open(0)` means "nothing transferable right now, but the direction is
/// still live", distinct from `Closed`, which never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The direction is permanently closed. No byte count is meaningful.
    Closed,
    /// The direction is live and has this many bytes pending (output side)
    /// or this much free buffer space (input side).
    Open(usize),
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open(n) => write!(f, "OPEN({})", n),
        }
    }
}

/// A protocol endpoint that can be driven by the pump.
///
/// The six operations below are the complete contract: the pump calls
/// nothing else. The output side is pull-based (`peek_output` is
/// non-destructive; `consume_output` removes what a caller has actually
/// delivered), and the input side is capacity-limited so that a slow
/// consumer throttles its producer.
///
/// # Contract
///
/// - `consume_output(n)` requires `n` to be at most the current pending
///   output. `push_input(bytes)` requires `bytes.len()` to be at most the
///   current input capacity. Violations are engine-contract violations:
///   implementations should enforce them with their own invariants (the
///   pump never violates them).
/// - Once a direction reports [`Window::Closed`] it must keep doing so.
pub trait Engine {
    /// Bytes framed and ready to transmit, or [`Window::Closed`] if the
    /// output direction is permanently closed.
    fn pending_output(&self) -> Window;

    /// Non-destructive read of up to `max` bytes from the front of the
    /// pending output. Returns an empty buffer when nothing is pending.
    fn peek_output(&self, max: usize) -> Bytes;

    /// Removes `n` bytes from the front of the pending output, after they
    /// have been delivered elsewhere.
    fn consume_output(&mut self, n: usize);

    /// Free input buffer space, or [`Window::Closed`] if the input
    /// direction is permanently closed.
    fn input_capacity(&self) -> Window;

    /// Appends bytes to the input buffer. Must not exceed the current
    /// input capacity.
    fn push_input(&mut self, bytes: Bytes);

    /// Signals that no more output will ever be produced. Used when the
    /// peer's input has closed and anything this engine would write could
    /// never be delivered.
    fn close_output(&mut self);

    /// Signals that no more input will ever be accepted. Used to propagate
    /// a peer's output close.
    fn close_input(&mut self);
}

/// An in-memory [`Engine`] backed by byte buffers.
///
/// The output side is an unbounded queue of bytes staged for transmission;
/// the input side is bounded by a fixed capacity, freed as the harness
/// drains it with [`take_input`](Self::take_input). Each direction carries
/// a sticky close flag.
///
/// # Close Semantics
///
/// `close_output` drops any bytes still staged: once the direction is
/// closed there is no one left to deliver them to. `close_input` leaves
/// already-received bytes readable via `take_input`; only *new* input is
/// refused.
///
/// # Example
///
/// ```rust
/// use wirepump::{Engine, MemoryEngine, Window};
///
/// let mut engine = MemoryEngine::new(64);
/// engine.stage_output(b"hello");
/// assert_eq!(engine.pending_output(), Window::Open(5));
/// assert_eq!(&engine.peek_output(3)[..], b"hel");
/// engine.consume_output(5);
/// assert_eq!(engine.pending_output(), Window::Open(0));
/// ```
#[derive(Debug)]
pub struct MemoryEngine {
    /// Bytes framed for transmission, front is next to go out
    output: BytesMut,
    /// Bytes received and not yet drained by the harness
    input: BytesMut,
    /// Maximum bytes `input` may hold
    input_limit: usize,
    /// Sticky close flag for the output direction
    output_closed: bool,
    /// Sticky close flag for the input direction
    input_closed: bool,
}

impl MemoryEngine {
    /// Creates an engine whose input buffer holds at most `input_limit`
    /// bytes.
    pub fn new(input_limit: usize) -> Self {
        Self {
            output: BytesMut::new(),
            input: BytesMut::new(),
            input_limit,
            output_closed: false,
            input_closed: false,
        }
    }

    /// Stages bytes for transmission, as a protocol layer framing data
    /// would.
    ///
    /// # Panics
    ///
    /// Panics if the output direction has been closed; a closed engine
    /// has nowhere for new output to go.
    pub fn stage_output(&mut self, bytes: &[u8]) {
        assert!(!self.output_closed, "stage_output on a closed output");
        self.output.extend_from_slice(bytes);
    }

    /// Drains everything received so far, freeing that much input capacity.
    pub fn take_input(&mut self) -> Bytes {
        self.input.split().freeze()
    }

    /// Bytes currently held in the input buffer.
    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Whether the output direction has been closed.
    pub fn is_output_closed(&self) -> bool {
        self.output_closed
    }

    /// Whether the input direction has been closed.
    pub fn is_input_closed(&self) -> bool {
        self.input_closed
    }
}

impl Engine for MemoryEngine {
    fn pending_output(&self) -> Window {
        if self.output_closed {
            Window::Closed
        } else {
            Window::Open(self.output.len())
        }
    }

    fn peek_output(&self, max: usize) -> Bytes {
        let n = max.min(self.output.len());
        Bytes::copy_from_slice(&self.output[..n])
    }

    fn consume_output(&mut self, n: usize) {
        assert!(!self.output_closed, "consume_output on a closed output");
        assert!(
            n <= self.output.len(),
            "consume_output past pending output ({} > {})",
            n,
            self.output.len()
        );
        self.output.advance(n);
    }

    fn input_capacity(&self) -> Window {
        if self.input_closed {
            Window::Closed
        } else {
            Window::Open(self.input_limit - self.input.len())
        }
    }

    fn push_input(&mut self, bytes: Bytes) {
        assert!(!self.input_closed, "push_input on a closed input");
        assert!(
            self.input.len() + bytes.len() <= self.input_limit,
            "push_input past input capacity ({} + {} > {})",
            self.input.len(),
            bytes.len(),
            self.input_limit
        );
        self.input.extend_from_slice(&bytes);
    }

    fn close_output(&mut self) {
        // Staged bytes can never be delivered once the direction closes.
        self.output.clear();
        self.output_closed = true;
    }

    fn close_input(&mut self) {
        self.input_closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_is_non_destructive() {
        let mut engine = MemoryEngine::new(16);
        engine.stage_output(b"abcdef");

        assert_eq!(&engine.peek_output(4)[..], b"abcd");
        assert_eq!(&engine.peek_output(4)[..], b"abcd");
        assert_eq!(engine.pending_output(), Window::Open(6));

        // Peeking past the pending output is clamped, not an error
        assert_eq!(&engine.peek_output(100)[..], b"abcdef");
    }

    #[test]
    fn test_consume_advances_front() {
        let mut engine = MemoryEngine::new(16);
        engine.stage_output(b"abcdef");
        engine.consume_output(2);
        assert_eq!(engine.pending_output(), Window::Open(4));
        assert_eq!(&engine.peek_output(4)[..], b"cdef");
    }

    #[test]
    fn test_capacity_tracks_buffered_input() {
        let mut engine = MemoryEngine::new(8);
        assert_eq!(engine.input_capacity(), Window::Open(8));

        engine.push_input(Bytes::from_static(b"abcde"));
        assert_eq!(engine.input_capacity(), Window::Open(3));

        // Draining frees the capacity again
        assert_eq!(&engine.take_input()[..], b"abcde");
        assert_eq!(engine.input_capacity(), Window::Open(8));
    }

    #[test]
    fn test_close_output_drops_staged_bytes() {
        let mut engine = MemoryEngine::new(8);
        engine.stage_output(b"doomed");
        engine.close_output();
        assert_eq!(engine.pending_output(), Window::Closed);
        assert!(engine.is_output_closed());
    }

    #[test]
    fn test_close_input_keeps_received_bytes_readable() {
        let mut engine = MemoryEngine::new(8);
        engine.push_input(Bytes::from_static(b"kept"));
        engine.close_input();
        assert_eq!(engine.input_capacity(), Window::Closed);
        assert_eq!(&engine.take_input()[..], b"kept");
    }

    #[test]
    #[should_panic(expected = "consume_output past pending output")]
    fn test_over_consume_panics() {
        let mut engine = MemoryEngine::new(8);
        engine.stage_output(b"ab");
        engine.consume_output(3);
    }

    #[test]
    #[should_panic(expected = "push_input past input capacity")]
    fn test_over_push_panics() {
        let mut engine = MemoryEngine::new(2);
        engine.push_input(Bytes::from_static(b"abc"));
    }

    #[test]
    #[should_panic(expected = "push_input on a closed input")]
    fn test_push_after_close_panics() {
        let mut engine = MemoryEngine::new(8);
        engine.close_input();
        engine.push_input(Bytes::from_static(b"x"));
    }
}
