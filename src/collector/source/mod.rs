//! Metric sources: the per-cycle read routines built on a backend.

mod arc;
mod memory;

pub use arc::ArcSource;
pub use memory::{MemoryLayout, MemoryOptions, MemorySource};

use tracing::{Level, debug, error, info, warn};

pub use super::assemble::ReadSummary;
use crate::dispatch::Dispatch;
use crate::error::CounterError;

/// Something the daemon reads once per interval.
///
/// A source is never read re-entrantly, but different sources may be read
/// concurrently and share a kstat handle.
pub trait MetricSource: Send {
    /// Plugin name used in dispatched records.
    fn name(&self) -> &str;

    /// Refreshes the backend and dispatches this cycle's records.
    ///
    /// Only a failed refresh (or a dispatcher failure) is returned as an
    /// error; missing counters are counted in `ReadSummary::skipped`.
    fn read(&mut self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError>;
}

impl<S: MetricSource + ?Sized> MetricSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self, dispatch: &dyn Dispatch) -> Result<ReadSummary, CounterError> {
        (**self).read(dispatch)
    }
}

/// Logs the outcome of a source's read cycles.
///
/// The first transient failure in a row is logged at WARN, repeats at DEBUG.
/// Any other failure is logged at ERROR every time. A successful cycle
/// re-arms the warning.
#[derive(Debug, Default)]
pub struct CycleReporter {
    transient_reported: bool,
}

impl CycleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a run of transient failures has been reported.
    pub fn transient_reported(&self) -> bool {
        self.transient_reported
    }

    /// Logs one cycle result and returns the level it was logged at.
    pub fn report(&mut self, source: &str, result: &Result<ReadSummary, CounterError>) -> Level {
        match result {
            Ok(summary) => {
                if self.transient_reported {
                    self.transient_reported = false;
                    info!("{}: source available again", source);
                    return Level::INFO;
                }
                debug!(
                    "{}: {} records, {} skipped",
                    source, summary.dispatched, summary.skipped
                );
                Level::DEBUG
            }
            Err(e) if e.is_transient() => {
                if self.transient_reported {
                    debug!("{}: still unavailable: {}", source, e);
                    return Level::DEBUG;
                }
                self.transient_reported = true;
                warn!("{}: read failed: {}", source, e);
                Level::WARN
            }
            Err(e) => {
                error!("{}: read failed: {}", source, e);
                Level::ERROR
            }
        }
    }
}
