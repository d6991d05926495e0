//! Agent runtime: hosts one bridge until interrupted.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use uplink_bridge_core::SensorResource;
use uplink_bridge_mqtt::MqttSensorBridge;

/// The host side of the bridge.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Validate, create the bridge, and poll readings until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the attributes are invalid or the bridge cannot start.
    pub async fn run(self) -> Result<()> {
        let errors = MqttSensorBridge::validate(&self.config.attributes);
        if !errors.is_empty() {
            for err in &errors {
                tracing::error!(key = err.key(), error = %err, "Invalid bridge attribute");
            }
            anyhow::bail!("invalid bridge configuration: {} problem(s)", errors.len());
        }

        let mut bridge =
            MqttSensorBridge::create_with(&self.config.attributes, self.config.connection.clone())
                .context("Failed to create bridge")?;

        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Agent running, press Ctrl+C to stop"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => report_reading(&bridge),

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        bridge.shutdown().await;
        tracing::info!("Agent stopped");
        Ok(())
    }
}

fn report_reading(bridge: &MqttSensorBridge) {
    let state = bridge.connection_state();

    match bridge.read() {
        Ok(readings) => {
            let reading = Value::Object(readings);
            let age_secs = bridge
                .snapshot()
                .recorded_at()
                .map(|at| (Utc::now() - at).num_seconds());
            tracing::info!(
                reading = %reading,
                age_secs = ?age_secs,
                state = %state,
                "Current reading"
            );
        }
        Err(err) => {
            tracing::info!(state = %state, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use uplink_bridge_mqtt::ConnectionSettings;

    #[tokio::test]
    async fn report_reading_before_and_after_data() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        ca.write_all(b"not a certificate").unwrap();

        let attributes = json!({
            "broker": "127.0.0.1",
            "port": 1,
            "username": "demo-app@ttn",
            "password": "secret",
            "tenant_id": "ttn",
            "app_id": "demo-app",
            "dev_id": "eui-0001",
            "payload_parameter": "current",
            "ca_file": ca.path().to_string_lossy()
        })
        .as_object()
        .cloned()
        .unwrap();
        let settings = ConnectionSettings {
            reconnect_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let mut bridge = MqttSensorBridge::create_with(&attributes, settings).unwrap();

        report_reading(&bridge);

        let payload = serde_json::to_vec(&json!({
            "received_at": "T1",
            "uplink_message": {"decoded_payload": {"current": 4.2}}
        }))
        .unwrap();
        let connection = bridge.connection().unwrap();
        connection.handler().handle(connection.topic(), &payload);

        report_reading(&bridge);
        assert_eq!(
            Value::Object(bridge.read().unwrap()),
            json!({"current :": 4.2, "Time: ": "T1"})
        );

        bridge.shutdown().await;
    }
}
