//! MQTT topic scheme of the network server.
//!
//! Topic structure: `v3/{app_id}@{tenant_id}/devices/{dev_id}/{event}`
//!
//! The bridge only subscribes to the `up` event of one device.

use serde::{Deserialize, Serialize};
use std::fmt;
use uplink_bridge_core::BridgeConfig;

/// Protocol version prefix of every topic.
pub const PROTOCOL_VERSION: &str = "v3";

/// Identifies one end device on the network server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopic {
    /// Tenant identifier
    pub tenant_id: String,
    /// Application identifier
    pub app_id: String,
    /// End-device identifier
    pub dev_id: String,
}

impl DeviceTopic {
    /// Create a topic scheme for one device.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        dev_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
            dev_id: dev_id.into(),
        }
    }

    /// Topic scheme for the device a bridge is configured for.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.tenant_id(), config.app_id(), config.dev_id())
    }

    fn base(&self) -> String {
        format!(
            "{PROTOCOL_VERSION}/{}@{}/devices/{}",
            self.app_id, self.tenant_id, self.dev_id
        )
    }

    /// Topic carrying uplink messages.
    #[must_use]
    pub fn uplink(&self) -> String {
        format!("{}/{}", self.base(), EventKind::Up.suffix())
    }

    /// Topic for a given event kind.
    #[must_use]
    pub fn event(&self, kind: EventKind) -> String {
        format!("{}/{}", self.base(), kind.suffix())
    }

    /// Parse a topic into its device and event kind.
    #[must_use]
    pub fn parse(topic: &str) -> Option<(Self, EventKind)> {
        let rest = topic.strip_prefix(PROTOCOL_VERSION)?.strip_prefix('/')?;
        let (application, rest) = rest.split_once('/')?;
        let (app_id, tenant_id) = application.split_once('@')?;
        let rest = rest.strip_prefix("devices/")?;
        let (dev_id, suffix) = rest.split_once('/')?;

        if app_id.is_empty() || tenant_id.is_empty() || dev_id.is_empty() {
            return None;
        }

        let kind = EventKind::from_suffix(suffix)?;
        Some((Self::new(tenant_id, app_id, dev_id), kind))
    }
}

impl fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base())
    }
}

/// Device event kinds published by the network server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Uplink message
    Up,
    /// Join accept
    Join,
    /// Downlink queued
    DownQueued,
    /// Downlink sent
    DownSent,
    /// Downlink acknowledged
    DownAck,
    /// Downlink failed
    DownFailed,
    /// Service data
    ServiceData,
    /// Location solved
    LocationSolved,
}

impl EventKind {
    /// Topic suffix for this kind.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Join => "join",
            Self::DownQueued => "down/queued",
            Self::DownSent => "down/sent",
            Self::DownAck => "down/ack",
            Self::DownFailed => "down/failed",
            Self::ServiceData => "service/data",
            Self::LocationSolved => "location/solved",
        }
    }

    /// Parse a topic suffix.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "up" => Some(Self::Up),
            "join" => Some(Self::Join),
            "down/queued" => Some(Self::DownQueued),
            "down/sent" => Some(Self::DownSent),
            "down/ack" => Some(Self::DownAck),
            "down/failed" => Some(Self::DownFailed),
            "service/data" => Some(Self::ServiceData),
            "location/solved" => Some(Self::LocationSolved),
            _ => None,
        }
    }
}
