//! Typed readings and dispatch-ready records.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Instantaneous measurement. `NaN` means "unavailable".
pub type Gauge = f64;

/// Monotonically increasing counter. Wraparound semantics belong to the source.
pub type Derive = i64;

/// Requested numeric interpretation of a named counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Gauge,
    Derive,
}

/// A single typed reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value {
    Gauge(Gauge),
    Derive(Derive),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Gauge(_) => ValueKind::Gauge,
            Value::Derive(_) => ValueKind::Derive,
        }
    }

    /// Returns the reading as a float, regardless of kind.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Gauge(g) => g,
            Value::Derive(d) => d as f64,
        }
    }
}

/// One batch of values for a metric category, handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRecord {
    /// Source that produced the record (e.g. "zfs_arc").
    pub plugin: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// Sub-category; may be empty.
    pub type_instance: String,
    pub time: DateTime<Utc>,
    pub values: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::Gauge(1.5).as_f64(), 1.5);
        assert_eq!(Value::Derive(42).as_f64(), 42.0);
        assert_eq!(Value::Derive(7).kind(), ValueKind::Derive);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let record = DispatchRecord {
            plugin: "zfs_arc".into(),
            type_: "cache_size".into(),
            type_instance: "arc".into(),
            time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            values: vec![Value::Gauge(1024.0), Value::Derive(3)],
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "cache_size");
        assert_eq!(json["type_instance"], "arc");
        assert_eq!(json["values"][0]["kind"], "gauge");
        assert_eq!(json["values"][1]["value"], 3);
    }
}
