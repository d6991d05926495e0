//! # uplink-bridge protocol
//!
//! Network-server wire formats consumed by the bridge.
//!
//! ## Topics
//!
//! Topic scheme: `v3/{app_id}@{tenant_id}/devices/{dev_id}/up`
//!
//! ## Messages
//!
//! Uplink documents of the shape
//! `{"uplink_message": {"decoded_payload": {...}}, "received_at": "..."}`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod topics;
pub mod uplink;

pub use topics::{DeviceTopic, EventKind};
pub use uplink::{DecodeError, Extracted, UplinkDecoder, UplinkEnvelope};
