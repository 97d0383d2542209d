//! Named counter store rebuilt from a flat text snapshot.
//!
//! Each snapshot line carries one counter: the first whitespace-separated
//! field is the key, a configurable later field is the raw value. Values stay
//! strings until a caller asks for a typed reading.

use std::collections::HashMap;
use std::io::BufRead;

use crate::error::CounterError;
use crate::sample::{Derive, Gauge, Value, ValueKind};

/// Key to raw-value table for one snapshot generation.
#[derive(Debug, Clone)]
pub struct CounterStore {
    entries: HashMap<String, String>,
    value_field: usize,
    generation: u64,
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore {
    /// Creates an empty store reading values from the second field.
    pub fn new() -> Self {
        Self::with_value_field(1)
    }

    /// Creates an empty store reading values from field `value_field`
    /// (0-based, must be at least 1 since field 0 is the key).
    ///
    /// ZFS `arcstats` lines are `name type data`, so they use field 2.
    pub fn with_value_field(value_field: usize) -> Self {
        Self {
            entries: HashMap::new(),
            value_field: value_field.max(1),
            generation: 0,
        }
    }

    /// Replaces the store contents with the records read from `reader`.
    ///
    /// Lines with too few fields are skipped. A repeated key keeps the last
    /// value seen. The new table is only swapped in after the whole input has
    /// been read, so a read error leaves the previous generation intact.
    pub fn rebuild_from<R: BufRead>(&mut self, reader: R) -> Result<(), CounterError> {
        let mut entries = HashMap::with_capacity(self.entries.len());

        for line in reader.lines() {
            let line = line?;
            if let Some((key, value)) = self.split_record(&line) {
                entries.insert(key.to_string(), value.to_string());
            }
        }

        self.entries = entries;
        self.generation += 1;
        Ok(())
    }

    fn split_record<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let mut fields = line.split_whitespace();
        let key = fields.next()?;
        let value = fields.nth(self.value_field - 1)?;

        let key = key.strip_suffix(':').unwrap_or(key);
        if key.is_empty() {
            return None;
        }
        Some((key, value))
    }

    /// Returns the raw string stored for `key`.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parses the value stored for `key` as the requested kind.
    pub fn get_typed(&self, key: &str, kind: ValueKind) -> Result<Value, CounterError> {
        let raw = self
            .get_raw(key)
            .ok_or_else(|| CounterError::NotFound(key.to_string()))?;

        let parsed = match kind {
            ValueKind::Gauge => parse_gauge(raw).map(Value::Gauge),
            ValueKind::Derive => parse_derive(raw).map(Value::Derive),
        };

        parsed.ok_or_else(|| CounterError::Parse {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    pub fn get_gauge(&self, key: &str) -> Result<Gauge, CounterError> {
        self.get_typed(key, ValueKind::Gauge).map(|v| v.as_f64())
    }

    pub fn get_derive(&self, key: &str) -> Result<Derive, CounterError> {
        match self.get_typed(key, ValueKind::Derive)? {
            Value::Derive(d) => Ok(d),
            Value::Gauge(g) => Ok(g as Derive),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful rebuilds so far (0 = never populated).
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn parse_gauge(raw: &str) -> Option<Gauge> {
    raw.parse::<f64>().ok()
}

/// Kernel counters are frequently unsigned 64-bit; values above `i64::MAX`
/// wrap like the kernel counter itself would.
fn parse_derive(raw: &str) -> Option<Derive> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<u64>().ok().map(|v| v as i64))
}
