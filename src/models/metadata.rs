//! Sensor metadata recorded by the camera next to each photo.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parsed contents of a `.json` sidecar.
///
/// The camera's payload is free-form: numeric top-level fields are sensor
/// readings (temperature, humidity, battery voltage, ...) and are kept in
/// `readings` for plotting; everything else lands in `extra`.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub readings: BTreeMap<String, f64>,
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    /// Parse a sidecar payload. Anything other than a JSON object is `None`.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        let Value::Object(fields) = serde_json::from_slice::<Value>(bytes).ok()? else {
            return None;
        };

        let mut metadata = Metadata::default();
        for (name, value) in fields {
            match value.as_f64() {
                Some(number) if number.is_finite() => {
                    metadata.readings.insert(name, number);
                }
                _ => {
                    metadata.extra.insert(name, value);
                }
            }
        }
        Some(metadata)
    }
}

/// Metadata resolved for one photo.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Outcome of looking up metadata for a set of photos.
///
/// Individual lookups may fail; the batch still carries every success plus a
/// count of the failures.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBatch {
    pub entries: Vec<PhotoMetadata>,
    pub failed: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Complete,
    /// Some lookups failed but at least one succeeded. A warning, not an error.
    Partial { failed: usize, total: usize },
    Failed,
}

impl MetadataBatch {
    pub fn status(&self) -> BatchStatus {
        if self.failed == 0 {
            BatchStatus::Complete
        } else if self.entries.is_empty() {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial {
                failed: self.failed,
                total: self.total,
            }
        }
    }

    /// User-facing warning for a partial batch, e.g. "2 of 10 failed".
    pub fn warning(&self) -> Option<String> {
        match self.status() {
            BatchStatus::Partial { failed, total } => Some(format!("{failed} of {total} failed")),
            _ => None,
        }
    }
}

/// A single point of a sensor trend.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
