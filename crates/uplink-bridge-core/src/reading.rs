//! Read-side view of the cache, formatted for the host.

use crate::cache::{Snapshot, ValueCache};
use crate::config::OutputMode;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Label of the timestamp entry in field mode.
pub const TIME_LABEL: &str = "Time: ";

/// Label of the single entry in whole-payload mode.
pub const TOTAL_PAYLOAD_LABEL: &str = "Total payload: ";

/// Readings as returned to the host.
pub type Readings = Map<String, Value>;

/// Label of the value entry in field mode.
#[must_use]
pub fn field_label(field: &str) -> String {
    format!("{field} :")
}

/// Synchronous reader over a [`ValueCache`]. Never touches the network.
#[derive(Debug, Clone)]
pub struct ReadingAccessor {
    cache: Arc<ValueCache>,
    mode: OutputMode,
}

impl ReadingAccessor {
    /// Create an accessor for the given cache and output mode.
    #[must_use]
    pub fn new(cache: Arc<ValueCache>, mode: OutputMode) -> Self {
        Self { cache, mode }
    }

    /// Current reading, labelled per output mode.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::NoDataAvailable`] until the first valid value arrives.
    pub fn get_reading(&self) -> Result<Readings, ReadError> {
        format_snapshot(&self.cache.read(), &self.mode)
    }

    /// Raw snapshot, without labels.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.cache.read()
    }

    /// Output mode used for labelling.
    #[must_use]
    pub fn mode(&self) -> &OutputMode {
        &self.mode
    }
}

/// Label a snapshot for the host.
///
/// # Errors
///
/// Returns [`ReadError::NoDataAvailable`] if the snapshot holds no value.
pub fn format_snapshot(snapshot: &Snapshot, mode: &OutputMode) -> Result<Readings, ReadError> {
    if !snapshot.has_value() {
        return Err(ReadError::NoDataAvailable);
    }

    let mut readings = Readings::new();
    match mode {
        OutputMode::Field(field) => {
            readings.insert(field_label(field), snapshot.value().clone());
            readings.insert(
                TIME_LABEL.to_string(),
                Value::String(snapshot.timestamp().to_string()),
            );
        }
        OutputMode::WholePayload => {
            readings.insert(TOTAL_PAYLOAD_LABEL.to_string(), snapshot.value().clone());
        }
    }
    Ok(readings)
}

/// Errors surfaced to the host on read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// No valid uplink has been received yet
    #[error("no data available: no valid uplink received yet")]
    NoDataAvailable,
}
