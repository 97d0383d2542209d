//! Error taxonomy shared by every backend and source.
//!
//! Errors fall into two groups. Per-counter errors (`NotFound`, `Parse`,
//! `InvalidArgument`) only skip the value being extracted. Everything else is
//! a per-source error and aborts the read cycle of that source.

use std::io;

/// Error type for counter acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterError {
    /// Backend was never refreshed successfully.
    NotInitialized,
    /// Kernel interface or counter file momentarily unreachable.
    TransientUnavailable(String),
    /// First-ever open/update failure with no prior state to fall back on.
    Fatal(String),
    /// Named counter absent in the current generation.
    NotFound(String),
    /// Counter present but not parseable as the requested kind.
    Parse { key: String, value: String },
    /// Record handle missing or of the wrong kind, unsupported field type, or
    /// a single value the kernel refused to return.
    InvalidArgument(String),
    /// Record handle belongs to an older chain generation; look it up again.
    Stale,
    /// Snapshot values contradict each other (e.g. used memory below zero).
    Inconsistent(String),
    /// The dispatch collaborator rejected a record.
    Dispatch(String),
}

impl CounterError {
    /// Returns `true` for errors that only skip a single named value.
    pub fn is_per_counter(&self) -> bool {
        matches!(
            self,
            CounterError::NotFound(_) | CounterError::Parse { .. } | CounterError::InvalidArgument(_)
        )
    }

    /// Returns `true` for failures that are expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, CounterError::TransientUnavailable(_))
    }
}

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterError::NotInitialized => write!(f, "backend not initialized"),
            CounterError::TransientUnavailable(msg) => write!(f, "source unavailable: {}", msg),
            CounterError::Fatal(msg) => write!(f, "fatal: {}", msg),
            CounterError::NotFound(name) => write!(f, "counter {} not found", name),
            CounterError::Parse { key, value } => {
                write!(f, "cannot parse {:?} for counter {}", value, key)
            }
            CounterError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CounterError::Stale => write!(f, "kstat handle is stale"),
            CounterError::Inconsistent(msg) => write!(f, "inconsistent snapshot: {}", msg),
            CounterError::Dispatch(msg) => write!(f, "dispatch failed: {}", msg),
        }
    }
}

impl std::error::Error for CounterError {}

impl From<io::Error> for CounterError {
    fn from(e: io::Error) -> Self {
        CounterError::TransientUnavailable(e.to_string())
    }
}
