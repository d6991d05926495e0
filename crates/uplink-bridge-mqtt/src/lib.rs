//! # uplink-bridge MQTT
//!
//! Broker session and sensor resource for the uplink bridge.
//!
//! The [`ConnectionManager`] owns one TLS MQTT session subscribed to
//! `v3/{app_id}@{tenant_id}/devices/{dev_id}/up` and feeds every uplink
//! through an [`UplinkHandler`] into the shared value cache.
//! [`MqttSensorBridge`] wraps both behind the host's
//! [`SensorResource`](uplink_bridge_core::SensorResource) lifecycle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod connection;
pub mod handler;

pub use bridge::{BridgeError, MqttSensorBridge};
pub use connection::{ConnectionError, ConnectionManager, ConnectionSettings, ConnectionState};
pub use handler::{HandleOutcome, UplinkHandler};
