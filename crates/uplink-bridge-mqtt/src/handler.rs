//! Per-message ingest: topic check, decode, cache update.

use std::sync::Arc;
use uplink_bridge_core::{CacheWriter, UpdateOutcome};
use uplink_bridge_proto::{DecodeError, Extracted, UplinkDecoder};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Decoded and offered to the cache
    Applied(UpdateOutcome),
    /// Decoded, but the configured field was absent
    FieldMissing,
    /// Could not be decoded; dropped
    Dropped(DecodeError),
    /// Arrived on a topic other than the subscribed one; dropped
    UnexpectedTopic,
    /// The session has been stopped; not processed
    Stopped,
}

/// Routes uplinks from one subscription into the cache.
///
/// Decode failures are contained here: they are logged and never reach the
/// cache or the read path.
#[derive(Debug, Clone)]
pub struct UplinkHandler {
    topic: String,
    decoder: UplinkDecoder,
    writer: Arc<CacheWriter>,
}

impl UplinkHandler {
    /// Create a handler for the subscribed topic.
    #[must_use]
    pub fn new(topic: impl Into<String>, decoder: UplinkDecoder, writer: Arc<CacheWriter>) -> Self {
        Self {
            topic: topic.into(),
            decoder,
            writer,
        }
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Process one message.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> HandleOutcome {
        if self.writer.is_revoked() {
            tracing::debug!(topic, "Session stopped, ignoring message");
            return HandleOutcome::Stopped;
        }

        let payload_len = payload.len();
        tracing::debug!(topic, payload_len, "Received MQTT message");

        if topic != self.topic {
            tracing::warn!(topic, expected = %self.topic, "Message on unexpected topic, dropping");
            return HandleOutcome::UnexpectedTopic;
        }

        let extracted = match self.decoder.decode(payload) {
            Ok(extracted) => extracted,
            Err(err) => {
                match &err {
                    DecodeError::Malformed(_) => {
                        tracing::error!(error = %err, topic, payload_len, "Failed to parse uplink");
                    }
                    DecodeError::Schema(_) => {
                        tracing::warn!(error = %err, topic, payload_len, "Message is not an uplink");
                    }
                }
                return HandleOutcome::Dropped(err);
            }
        };

        match extracted {
            Extracted::FieldMissing => {
                tracing::info!(
                    field = self.decoder.mode().field().unwrap_or_default(),
                    "Decoded payload does not contain the configured field"
                );
                HandleOutcome::FieldMissing
            }
            Extracted::Value { value, timestamp } => {
                tracing::debug!(%value, %timestamp, "Decoded uplink value");
                let outcome = self.writer.update(value, timestamp);
                match outcome {
                    UpdateOutcome::Stored => tracing::info!("Updated cached reading"),
                    UpdateOutcome::Retained => {
                        tracing::info!("Empty value received, keeping last known reading");
                    }
                    UpdateOutcome::Ignored => {
                        tracing::info!("Empty value received, no reading recorded yet");
                    }
                    UpdateOutcome::Revoked => {
                        tracing::debug!("Session stopped while decoding, value discarded");
                    }
                }
                HandleOutcome::Applied(outcome)
            }
        }
    }
}
