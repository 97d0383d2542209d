//! Ratio derivation and dispatch-record assembly.
//!
//! A source reads a fixed list of named counters from its backend once per
//! cycle. Each extraction is independent: a missing or unparseable counter is
//! logged and skipped, the rest of the cycle still dispatches.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::Backend;
use crate::dispatch::Dispatch;
use crate::error::CounterError;
use crate::sample::{DispatchRecord, Gauge, Value, ValueKind};

/// Derives a hit ratio from a pair of counters.
///
/// Non-finite and negative inputs count as 0. When both sides are 0 the
/// result is `NaN` ("no data"), not a 0% hit rate.
pub fn compute_ratio(hits: Gauge, misses: Gauge) -> Gauge {
    let clamp = |v: Gauge| if v.is_finite() && v >= 0.0 { v } else { 0.0 };
    let hits = clamp(hits);
    let misses = clamp(misses);

    if hits == 0.0 && misses == 0.0 {
        return Gauge::NAN;
    }
    hits / (hits + misses)
}

/// Converts a batch of gauges into percentages of the batch's finite sum.
///
/// Non-finite entries stay `NaN`. An empty or zero sum yields all `NaN`.
pub fn to_percentages(values: &[Gauge]) -> Vec<Gauge> {
    let sum: Gauge = values.iter().filter(|v| v.is_finite()).sum();
    values
        .iter()
        .map(|&v| {
            if v.is_finite() && sum > 0.0 {
                v * 100.0 / sum
            } else {
                Gauge::NAN
            }
        })
        .collect()
}

/// One named counter and where its value is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    pub counter: &'static str,
    pub kind: ValueKind,
    pub type_: &'static str,
    pub type_instance: &'static str,
}

impl Extraction {
    pub const fn gauge(counter: &'static str, type_: &'static str, type_instance: &'static str) -> Self {
        Self {
            counter,
            kind: ValueKind::Gauge,
            type_,
            type_instance,
        }
    }

    pub const fn derive(counter: &'static str, type_: &'static str, type_instance: &'static str) -> Self {
        Self {
            counter,
            kind: ValueKind::Derive,
            type_,
            type_instance,
        }
    }
}

/// Outcome of one read cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Records handed to the dispatcher.
    pub dispatched: usize,
    /// Counters skipped because they were missing or unparseable.
    pub skipped: usize,
}

impl ReadSummary {
    pub fn merge(&mut self, other: ReadSummary) {
        self.dispatched += other.dispatched;
        self.skipped += other.skipped;
    }
}

/// Builds records for one plugin and hands them to a dispatcher.
#[derive(Debug, Clone)]
pub struct Assembler {
    plugin: String,
}

impl Assembler {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn record(&self, type_: &str, type_instance: &str, time: DateTime<Utc>, values: Vec<Value>) -> DispatchRecord {
        DispatchRecord {
            plugin: self.plugin.clone(),
            type_: type_.to_string(),
            type_instance: type_instance.to_string(),
            time,
            values,
        }
    }

    /// Dispatches one record stamped with the current time.
    ///
    /// A dispatcher failure is returned as `CounterError::Dispatch`.
    pub fn assemble_and_dispatch(
        &self,
        type_: &str,
        type_instance: &str,
        values: Vec<Value>,
        dispatch: &dyn Dispatch,
    ) -> Result<(), CounterError> {
        let record = self.record(type_, type_instance, Utc::now(), values);
        dispatch.dispatch(&record)?;
        Ok(())
    }

    /// Dispatches `cache_ratio/<type_instance>` from a hits/misses pair.
    pub fn submit_ratio(
        &self,
        type_instance: &str,
        hits: Gauge,
        misses: Gauge,
        dispatch: &dyn Dispatch,
    ) -> Result<(), CounterError> {
        let ratio = compute_ratio(hits, misses);
        self.assemble_and_dispatch("cache_ratio", type_instance, vec![Value::Gauge(ratio)], dispatch)
    }

    /// Dispatches one single-gauge record per `(type_instance, value)` pair,
    /// all sharing one timestamp.
    ///
    /// With `as_percentage` the values are replaced by their share of the
    /// batch and dispatched under type `percent` instead of `type_`.
    pub fn dispatch_multivalue(
        &self,
        type_: &str,
        entries: &[(&str, Gauge)],
        as_percentage: bool,
        dispatch: &dyn Dispatch,
    ) -> Result<usize, CounterError> {
        let time = Utc::now();
        let (type_, values) = if as_percentage {
            let raw: Vec<Gauge> = entries.iter().map(|&(_, v)| v).collect();
            ("percent", to_percentages(&raw))
        } else {
            (type_, entries.iter().map(|&(_, v)| v).collect())
        };

        for (&(type_instance, _), value) in entries.iter().zip(values) {
            let record = self.record(type_, type_instance, time, vec![Value::Gauge(value)]);
            dispatch.dispatch(&record)?;
        }
        Ok(entries.len())
    }

    /// Reads every extraction from an already refreshed backend and
    /// dispatches each as its own record.
    ///
    /// Per-counter errors skip that counter only; any other error aborts.
    pub fn extract_each<B: Backend + ?Sized>(
        &self,
        backend: &B,
        extractions: &[Extraction],
        dispatch: &dyn Dispatch,
    ) -> Result<ReadSummary, CounterError> {
        let mut summary = ReadSummary::default();
        for ex in extractions {
            match backend.get_value(ex.counter, ex.kind) {
                Ok(value) => {
                    self.assemble_and_dispatch(ex.type_, ex.type_instance, vec![value], dispatch)?;
                    summary.dispatched += 1;
                }
                Err(e) if e.is_per_counter() => {
                    debug!("{}: skipping {}: {}", self.plugin, ex.counter, e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }
}
