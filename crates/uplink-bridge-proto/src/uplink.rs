//! Uplink envelope decoding.
//!
//! Only the parts of the network-server uplink document the bridge needs are
//! modelled; everything else is ignored.

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use uplink_bridge_core::OutputMode;

/// Top-level uplink document.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkEnvelope {
    /// Message body
    pub uplink_message: UplinkMessage,
    /// Time the network server received the message
    #[serde(default)]
    pub received_at: Option<String>,
}

/// The `uplink_message` object.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkMessage {
    /// Application payload as decoded by the upstream payload formatter
    pub decoded_payload: Map<String, Value>,
    /// Receive time recorded on the message itself
    #[serde(default)]
    pub received_at: Option<String>,
}

impl UplinkEnvelope {
    /// Parse raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] if the bytes are not JSON and
    /// [`DecodeError::Schema`] if the document is not an uplink.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let document: Value =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        serde_json::from_value(document).map_err(|e| DecodeError::Schema(e.to_string()))
    }

    /// Best available receive timestamp: top level, then message level.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.received_at
            .as_deref()
            .or(self.uplink_message.received_at.as_deref())
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// A value to offer to the cache
    Value {
        /// Extracted value
        value: Value,
        /// Receive timestamp
        timestamp: String,
    },
    /// The uplink does not carry the configured field
    FieldMissing,
}

/// Turns raw uplink bytes into a value for the configured output mode.
#[derive(Debug, Clone)]
pub struct UplinkDecoder {
    mode: OutputMode,
}

impl UplinkDecoder {
    /// Create a decoder for an output mode.
    #[must_use]
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// Output mode this decoder extracts for.
    #[must_use]
    pub fn mode(&self) -> &OutputMode {
        &self.mode
    }

    /// Decode one message.
    ///
    /// A missing receive timestamp is replaced by the local receive time.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not a well-formed uplink.
    pub fn decode(&self, payload: &[u8]) -> Result<Extracted, DecodeError> {
        let envelope = UplinkEnvelope::from_slice(payload)?;

        let timestamp = envelope.timestamp().map_or_else(
            || Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            str::to_string,
        );

        let UplinkEnvelope { uplink_message, .. } = envelope;
        let mut decoded_payload = uplink_message.decoded_payload;

        let value = match &self.mode {
            OutputMode::WholePayload => Value::Object(decoded_payload),
            OutputMode::Field(field) => match decoded_payload.remove(field) {
                Some(value) => value,
                None => return Ok(Extracted::FieldMissing),
            },
        };

        Ok(Extracted::Value { value, timestamp })
    }
}

/// Errors decoding an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not valid JSON
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Valid JSON without `uplink_message.decoded_payload`
    #[error("unexpected message shape: {0}")]
    Schema(String),
}
