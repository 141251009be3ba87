//! Error types for the pump test harness.
//!
//! This module defines the error types used by the scaffolding around the
//! pump (server loop, port discovery, fixture configuration):
//!
//! - [`HarnessError`]: The main error type encompassing all possible errors
//!
//! The pump itself has no error paths: all abnormal conditions on an engine
//! are expressed through its close signals, and a well-formed engine can
//! always be pumped to a fixed point. Retry-budget exhaustion during setup
//! (port discovery, server bind) is a fatal assertion rather than an error
//! value, since nothing can proceed without a port.

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in the pump test harness.
///
/// This enum uses `Arc<str>` for string fields to make cloning cheap,
/// since errors may be recorded and re-examined by test code.
///
/// # Stability
///
/// This enum is marked `#[non_exhaustive]`, meaning new variants may be added
/// in future versions without a breaking change. When matching on this enum,
/// always include a wildcard arm (`_`) to handle unknown variants.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HarnessError {
    /// An acceptor could not bind to the requested address.
    ///
    /// This is recoverable: the caller may retry with a different port.
    /// The server loop does exactly that when asked to pick its own port.
    #[error("Failed to bind {host}:{port}: {reason}")]
    BindFailed {
        /// Host the bind was attempted on
        host: Arc<str>,
        /// Port the bind was attempted on
        port: u16,
        /// Underlying OS error text
        reason: Arc<str>,
    },

    /// An operation required an acceptor, but none is open.
    ///
    /// Returned when an acceptor-dependent call is made after `stop`, or
    /// before `acceptor` has been called.
    #[error("Acceptor is closed")]
    AcceptorClosed,

    /// A prerequisite for the requested behavior is absent.
    ///
    /// This is a benign skip condition, not a failure: a test runner should
    /// report it as "skipped" so that "prerequisite absent" can be told
    /// apart from "behavior wrong". See [`HarnessError::is_skip`].
    #[error("Skipped: {0}")]
    Skipped(Arc<str>),

    /// The provided configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(Arc<str>),

    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    IoError(Arc<str>),
}

impl HarnessError {
    /// Returns true when this error marks a skipped prerequisite rather
    /// than a genuine failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, HarnessError::Skipped(_))
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::IoError(Arc::from(err.to_string()))
    }
}
