//! Kernel statistics (kstat) access.
//!
//! The kernel exposes statistics as a chain of records addressed by
//! `(module, instance, name)`. Every chain update produces a new generation
//! id; record handles obtained from an older generation must be looked up
//! again. `KstatHandle` serializes all access to the shared connection and
//! throttles chain updates to one per second.

mod handle;
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
mod libkstat;

pub use handle::{KstatHandle, STALENESS_WINDOW_SECS};
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
pub use libkstat::{LibKstat, shared};

use std::io;

use crate::error::CounterError;
use crate::sample::{Derive, Gauge};

/// Chain generation identifier (`kid_t`).
pub type ChainId = i32;

/// Layout of a kstat record's data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KstatKind {
    Raw,
    Named,
    Intr,
    Io,
    Timer,
}

impl KstatKind {
    pub fn from_raw(ks_type: u8) -> Option<Self> {
        match ks_type {
            0 => Some(KstatKind::Raw),
            1 => Some(KstatKind::Named),
            2 => Some(KstatKind::Intr),
            3 => Some(KstatKind::Io),
            4 => Some(KstatKind::Timer),
            _ => None,
        }
    }
}

/// Native value of a named statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NamedValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    /// Character or string data; not a counter.
    Unsupported,
}

impl NamedValue {
    fn as_gauge(&self) -> Option<Gauge> {
        match *self {
            NamedValue::Int32(v) => Some(v as Gauge),
            NamedValue::UInt32(v) => Some(v as Gauge),
            NamedValue::Int64(v) => Some(v as Gauge),
            NamedValue::UInt64(v) => Some(v as Gauge),
            NamedValue::Unsupported => None,
        }
    }

    fn as_derive(&self) -> Option<Derive> {
        match *self {
            NamedValue::Int32(v) => Some(v as Derive),
            NamedValue::UInt32(v) => Some(v as Derive),
            NamedValue::Int64(v) => Some(v),
            // Counters past i64::MAX wrap, as the kernel counter eventually would.
            NamedValue::UInt64(v) => Some(v as Derive),
            NamedValue::Unsupported => None,
        }
    }
}

/// One named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedStat {
    pub name: String,
    pub value: NamedValue,
}

/// Materialized copy of a record's data, taken by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct KstatRecord {
    pub kind: KstatKind,
    pub named: Vec<NamedStat>,
}

impl KstatRecord {
    pub fn named(stats: Vec<NamedStat>) -> Self {
        Self {
            kind: KstatKind::Named,
            named: stats,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&NamedValue> {
        self.named.iter().find(|s| s.name == name).map(|s| &s.value)
    }
}

/// Address of a record within the chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KstatId {
    pub module: String,
    pub instance: i32,
    pub name: String,
}

impl KstatId {
    pub fn new(module: &str, instance: i32, name: &str) -> Self {
        Self {
            module: module.to_string(),
            instance,
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for KstatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.module, self.instance, self.name)
    }
}

/// Record handle tied to the chain generation it was looked up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KstatRef {
    pub id: KstatId,
    pub chain_id: ChainId,
}

/// An open connection to the kernel statistics facility (`kstat_ctl_t`).
pub trait KstatCtl: Send {
    /// Generation id of the chain this connection currently holds.
    fn chain_id(&self) -> ChainId;

    /// Brings the chain up to date.
    ///
    /// Returns `Ok(Some(id))` when the chain changed, `Ok(None)` when it was
    /// already current.
    fn chain_update(&mut self) -> io::Result<Option<ChainId>>;

    /// Returns `true` if the current chain has a record with this address.
    fn contains(&self, id: &KstatId) -> bool;

    /// Reads the record's current data.
    fn read(&mut self, id: &KstatId) -> io::Result<KstatRecord>;

    /// Addresses of every record in the current chain, in chain order.
    fn ids(&self) -> Vec<KstatId>;
}

/// Reads `name` from a named record as a gauge.
pub fn extract_gauge(record: Option<&KstatRecord>, name: &str) -> Result<Gauge, CounterError> {
    let value = named_field(record, name)?;
    value
        .as_gauge()
        .ok_or_else(|| CounterError::InvalidArgument(format!("{} is not an integer field", name)))
}

/// Reads `name` from a named record as a derive.
pub fn extract_derive(record: Option<&KstatRecord>, name: &str) -> Result<Derive, CounterError> {
    let value = named_field(record, name)?;
    value
        .as_derive()
        .ok_or_else(|| CounterError::InvalidArgument(format!("{} is not an integer field", name)))
}

fn named_field<'a>(
    record: Option<&'a KstatRecord>,
    name: &str,
) -> Result<&'a NamedValue, CounterError> {
    let record = record.ok_or_else(|| CounterError::InvalidArgument("null kstat".to_string()))?;
    if record.kind != KstatKind::Named {
        return Err(CounterError::InvalidArgument(format!(
            "kstat is {:?}, not named",
            record.kind
        )));
    }
    record
        .lookup(name)
        .ok_or_else(|| CounterError::NotFound(name.to_string()))
}
