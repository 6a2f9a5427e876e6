// ── Core error types ──
//
// Errors surfaced by tungate-core. Only configuration problems and
// on-demand lookups reach callers; everything raised inside a periodic
// loop is logged at the call site and dropped with that iteration.

use thiserror::Error;
use tracing::{debug, warn};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Access control ───────────────────────────────────────────────
    #[error("Unsupported access mode '{mode}' (only 'dhcp' is supported)")]
    UnsupportedMode { mode: String },

    #[error("Device not found: {mac}")]
    DeviceNotFound { mac: String },

    #[error("Device directory error: {message}")]
    Directory { message: String },

    // ── External command errors ──────────────────────────────────────
    /// A removal target (route, rule, address) did not exist.
    #[error("{what} not present")]
    NotPresent { what: String },

    #[error("`{program} {args}` failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the error only says the thing being removed was already gone.
    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent { .. })
    }
}

/// Swallow the result of a removal that is allowed to fail.
///
/// An absent target is routine (a remote that never installed the route,
/// a rule already cleaned up) and logged at debug. Anything else is logged
/// at warn so real faults stay visible.
pub(crate) fn tolerate(result: Result<(), CoreError>, what: &str) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_not_present() => debug!(what, "already absent"),
        Err(e) => warn!(what, error = %e, "tolerated removal failure"),
    }
}
