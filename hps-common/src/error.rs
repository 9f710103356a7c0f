//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `hps-rs`.
pub type HpsResult<T> = Result<T, HpsError>;

/// High-level error categories.
///
/// Only the startup variants (`InvalidConfig`, `Listen`, `Io` from poll creation) are
/// process-fatal. Everything raised on a per-message or per-connection path is logged and
/// contained by the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HpsError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Wire payload is malformed or semantically invalid.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket or filesystem I/O failed.
    #[error("io error: {0}")]
    Io(String),

    /// Opening one listening socket failed.
    #[error("listen on port {port} failed: {reason}")]
    Listen {
        /// Port that could not be opened.
        port: u16,
        /// Underlying OS error text.
        reason: String,
    },

    /// Every connection slot is in use.
    #[error("connection pool exhausted (capacity {capacity})")]
    PoolExhausted {
        /// Configured pool capacity.
        capacity: usize,
    },

    /// A connection handle refers to a slot that was closed or reused since it was issued.
    #[error("connection reference is stale")]
    StaleConnection,
}
