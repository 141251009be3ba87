//! The duplex transport pump.
//!
//! This module moves bytes between two [`Engine`]s without real sockets,
//! while reproducing the backpressure, half-close, and termination semantics
//! of a real network link.
//!
//! # Overview
//!
//! - [`pump_unidirectional`]: one bounded transfer attempt from a source
//!   engine's pending output into a destination engine's input, including
//!   close propagation.
//! - [`pump`]: the fixed-point loop that alternates directions until neither
//!   can make progress.
//!
//! # Backpressure
//!
//! Each call transfers at most `min(capacity, buffer_size)` bytes. The cap
//! models a bounded-size network read: no single call can move unbounded
//! data even when one side has a very large backlog, and a slow consumer
//! (capacity near zero) throttles how much its producer can push per round.
//!
//! # Concurrency
//!
//! The pump is single-threaded and synchronous. It never suspends, never
//! blocks on I/O, and holds no state beyond the two engine borrows. Do not
//! drive the same engine pair from multiple threads.

use crate::engine::{Engine, Window};

/// Default per-call transfer bound, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Transfers at most `buffer_size` bytes of `src`'s pending output into
/// `dst`'s input, and reports whether any state changed (a byte transfer,
/// or a close signal propagated).
///
/// The checks run in a fixed priority order:
///
/// 1. Destination input closed: tell the source its output can never be
///    delivered (`close_output`), unless the source is already closed too,
///    in which case the direction is quiescent.
/// 2. Source output closed (destination still accepting): propagate the
///    close to the destination (`close_input`).
/// 3. Zero pending output or zero capacity: nothing transferable right now.
/// 4. Otherwise: peek up to `min(capacity, buffer_size)` bytes, push them
///    into the destination, and consume exactly what was peeked.
///
/// Close checks come before the byte-count checks: a close signal is not a
/// byte count, and a fully-closed destination must be detected even while
/// the source reports zero pending bytes. One consequence: when the
/// destination closes while the source still has output staged, that
/// output is dropped without a final flush. Keep this in mind if your
/// engines can be "closed but still holding unflushed output".
///
/// Never panics on well-formed engines; the transfer arm consumes only what
/// `peek_output` actually returned, which is itself bounded by the
/// destination's reported capacity.
pub fn pump_unidirectional<S, D>(src: &mut S, dst: &mut D, buffer_size: usize) -> bool
where
    S: Engine + ?Sized,
    D: Engine + ?Sized,
{
    let pending = src.pending_output();
    let capacity = dst.input_capacity();

    match (pending, capacity) {
        // Both directions dead: quiescent, nothing left to signal.
        (Window::Closed, Window::Closed) => false,

        // Destination can never accept again: whatever the source would
        // write is undeliverable, so close its output.
        (_, Window::Closed) => {
            tracing::debug!("input closed on destination, closing source output");
            src.close_output();
            true
        }

        // Source will never produce again: propagate EOF downstream.
        (Window::Closed, _) => {
            tracing::debug!("output closed on source, closing destination input");
            dst.close_input();
            true
        }

        // Live in both directions but nothing transferable right now.
        (Window::Open(0), _) | (_, Window::Open(0)) => false,

        (Window::Open(_), Window::Open(capacity)) => {
            let bytes = src.peek_output(capacity.min(buffer_size));
            let moved = bytes.len();
            tracing::trace!(moved, capacity, buffer_size, "transferring bytes");
            dst.push_input(bytes);
            src.consume_output(moved);
            true
        }
    }
}

/// Pumps both directions between `a` and `b` until a fixed point: a full
/// round in which neither direction transfers bytes nor propagates a close.
///
/// Each iteration attempts `a → b` first and, when that direction reports
/// no change, `b → a`; the loop repeats while either call reports progress,
/// so both directions get a chance every full round. Terminates in a finite
/// number of steps for well-behaved engines (pending output strictly
/// decreases, or a close signal is reached). An engine that never exhausts
/// its pending output nor signals closure is a caller bug; the pump
/// applies no internal retry limit or timeout.
pub fn pump<A, B>(a: &mut A, b: &mut B, buffer_size: usize)
where
    A: Engine + ?Sized,
    B: Engine + ?Sized,
{
    while pump_unidirectional(a, b, buffer_size) || pump_unidirectional(b, a, buffer_size) {}
}
