//! Latest-value cache shared between the ingest task and the reader.
//!
//! The cache keeps one reading: the last *non-empty* value and the timestamp
//! it arrived with. Empty updates (zero, `""`, `{}`, `[]`, `null`) never
//! overwrite it, so an intermittent uplink that drops the field or reports a
//! zero leaves the previous measurement in place. A genuine zero measurement is
//! therefore indistinguishable from a dropped field.
//!
//! Writes go through a [`CacheWriter`]. Issuing a new writer, or revoking the
//! current one, turns every older writer into a no-op under the same lock that
//! guards the reading, so no write can land after revocation returns.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Whether a value counts as "no measurement" for the fallback policy.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(_) => false,
        Value::Number(number) => number.as_f64().is_some_and(|n| n == 0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

/// A recorded measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Measured value
    pub value: Value,
    /// Timestamp reported with the message
    pub timestamp: String,
    /// Local time the cache accepted it
    pub recorded_at: DateTime<Utc>,
}

/// Immutable view of the cache at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    reading: Option<Reading>,
}

impl Snapshot {
    /// `false` only before the first non-empty update.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.reading.is_some()
    }

    /// Stored value, `Null` when nothing has been recorded.
    #[must_use]
    pub fn value(&self) -> &Value {
        self.reading.as_ref().map_or(&Value::Null, |r| &r.value)
    }

    /// Stored timestamp, empty when nothing has been recorded.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        self.reading.as_ref().map_or("", |r| r.timestamp.as_str())
    }

    /// Local time of the last accepted update.
    #[must_use]
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.reading.as_ref().map(|r| r.recorded_at)
    }

    /// The underlying reading.
    #[must_use]
    pub fn reading(&self) -> Option<&Reading> {
        self.reading.as_ref()
    }
}

/// What an update did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The value replaced the stored reading
    Stored,
    /// The value was empty; the previous reading was kept
    Retained,
    /// The value was empty and nothing had been recorded yet
    Ignored,
    /// The writer has been revoked; nothing changed
    Revoked,
}

#[derive(Debug, Default)]
struct CacheState {
    last_good: Option<Reading>,
    writer_epoch: u64,
}

impl CacheState {
    fn apply(&mut self, value: Value, timestamp: String) -> UpdateOutcome {
        if is_empty_value(&value) {
            return if self.last_good.is_some() {
                UpdateOutcome::Retained
            } else {
                UpdateOutcome::Ignored
            };
        }

        self.last_good = Some(Reading {
            value,
            timestamp,
            recorded_at: Utc::now(),
        });
        UpdateOutcome::Stored
    }
}

/// Single-slot cache guarded by one mutex.
#[derive(Debug, Default)]
pub struct ValueCache {
    state: Mutex<CacheState>,
}

impl ValueCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a value to the cache, applying the fallback policy.
    pub fn update(&self, value: Value, timestamp: impl Into<String>) -> UpdateOutcome {
        self.lock().apply(value, timestamp.into())
    }

    /// Take a consistent snapshot.
    #[must_use]
    pub fn read(&self) -> Snapshot {
        Snapshot {
            reading: self.lock().last_good.clone(),
        }
    }

    /// Issue a writer. Every writer issued earlier stops taking effect.
    #[must_use]
    pub fn writer(self: &Arc<Self>) -> CacheWriter {
        let mut state = self.lock();
        state.writer_epoch += 1;
        CacheWriter {
            cache: Arc::clone(self),
            epoch: state.writer_epoch,
        }
    }

    // The state is a plain value pair; a panicked writer cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Revocable write handle held by one ingest session.
#[derive(Debug)]
pub struct CacheWriter {
    cache: Arc<ValueCache>,
    epoch: u64,
}

impl CacheWriter {
    /// Offer a value; a no-op once this writer is revoked.
    pub fn update(&self, value: Value, timestamp: impl Into<String>) -> UpdateOutcome {
        let mut state = self.cache.lock();
        if state.writer_epoch != self.epoch {
            return UpdateOutcome::Revoked;
        }
        state.apply(value, timestamp.into())
    }

    /// Stop this writer. Idempotent; never affects a newer writer.
    pub fn revoke(&self) {
        let mut state = self.cache.lock();
        if state.writer_epoch == self.epoch {
            state.writer_epoch += 1;
        }
    }

    /// Whether updates through this writer are still applied.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.cache.lock().writer_epoch != self.epoch
    }

    /// The cache this writer feeds.
    #[must_use]
    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }
}
