//! The dispatch collaborator: whatever consumes finished records.
//!
//! The core only needs a single call that accepts a record and reports
//! success or failure. Retrying, batching across cycles and transport are the
//! collaborator's business.

use std::io::{self, Write};
use std::sync::Mutex;

use crate::error::CounterError;
use crate::sample::DispatchRecord;

/// Error returned by a dispatcher.
#[derive(Debug)]
pub struct DispatchError {
    pub message: String,
}

impl DispatchError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dispatch error: {}", self.message)
    }
}

impl std::error::Error for DispatchError {}

impl From<DispatchError> for CounterError {
    fn from(e: DispatchError) -> Self {
        CounterError::Dispatch(e.message)
    }
}

/// Receiver of dispatch-ready records.
///
/// Implementations must tolerate calls from several sources at once.
pub trait Dispatch: Send + Sync {
    /// Hands one record to the rest of the pipeline.
    fn dispatch(&self, record: &DispatchRecord) -> Result<(), DispatchError>;
}

/// Writes each record as one JSON object per line.
pub struct JsonLinesDispatcher<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesDispatcher<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Consumes the dispatcher and returns the underlying writer.
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesDispatcher<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Dispatch for JsonLinesDispatcher<W> {
    fn dispatch(&self, record: &DispatchRecord) -> Result<(), DispatchError> {
        let line = serde_json::to_string(record).map_err(|e| DispatchError::new(e.to_string()))?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| DispatchError::new("output lock poisoned"))?;
        writeln!(out, "{}", line).map_err(|e| DispatchError::new(e.to_string()))?;
        out.flush().map_err(|e| DispatchError::new(e.to_string()))
    }
}
