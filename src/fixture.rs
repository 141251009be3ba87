//! Explicit configuration for test fixtures.
//!
//! Fixtures that wrap an optional external tool (an instrumentation
//! wrapper such as a leak checker, for example) historically discovered it
//! through process-wide environment variables. [`FixtureConfig`] replaces
//! that with an explicit object passed at fixture construction, so the
//! requirement is visible at the call site and the "tool absent" outcome
//! is a first-class skip instead of a silent behavior change.

use crate::error::HarnessError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration handed to test fixture constructors.
///
/// # Construction
///
/// Use [`FixtureConfig::new()`] and chain `with_*` methods:
///
/// ```rust
/// use wirepump::FixtureConfig;
///
/// let config = FixtureConfig::new()
///     .with_external_tool("/usr/bin/valgrind");
/// assert!(config.external_tool().is_ok());
/// ```
///
/// # Stability
///
/// This struct is marked `#[non_exhaustive]`; always use the constructor
/// and builder methods rather than struct literal syntax.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct FixtureConfig {
    /// Whether fixtures should run their subject under the external tool
    pub use_external_tool: bool,

    /// Path to the external tool binary, when one is available
    pub tool_path: Option<PathBuf>,
}

impl FixtureConfig {
    /// Creates a configuration with the external tool disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the external tool and records where to find it.
    pub fn with_external_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.use_external_tool = true;
        self.tool_path = Some(path.into());
        self
    }

    /// Requests the external tool without knowing its location. A fixture
    /// built from such a configuration reports itself skipped.
    pub fn requiring_external_tool(mut self) -> Self {
        self.use_external_tool = true;
        self
    }

    /// Resolves the external tool path for a fixture that needs one.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Skipped`] when the tool is requested but its path
    ///   is absent: the fixture's prerequisite is missing, which a test
    ///   runner should report as "skipped", not "failed".
    /// - [`HarnessError::ConfigError`] when the tool was not requested at
    ///   all: asking for it anyway is a fixture wiring mistake.
    pub fn external_tool(&self) -> Result<&Path, HarnessError> {
        if !self.use_external_tool {
            return Err(HarnessError::ConfigError(Arc::from(
                "fixture does not request an external tool",
            )));
        }
        match &self.tool_path {
            Some(path) => Ok(path),
            None => Err(HarnessError::Skipped(Arc::from(
                "external tool requested but no tool path configured",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_path_resolves() {
        let config = FixtureConfig::new().with_external_tool("/opt/tools/wrapper");
        assert_eq!(
            config.external_tool().unwrap(),
            Path::new("/opt/tools/wrapper")
        );
    }

    #[test]
    fn test_missing_tool_is_skip_not_failure() {
        let config = FixtureConfig::new().requiring_external_tool();
        let err = config.external_tool().unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_unrequested_tool_is_config_error() {
        let config = FixtureConfig::new();
        let err = config.external_tool().unwrap_err();
        assert!(!err.is_skip());
        assert!(matches!(err, HarnessError::ConfigError(_)));
    }
}
