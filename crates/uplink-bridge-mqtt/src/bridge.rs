//! The bridge as a host-facing sensor resource.

use crate::connection::{ConnectionError, ConnectionManager, ConnectionSettings, ConnectionState};
use std::sync::Arc;
use uplink_bridge_core::{
    Attributes, BridgeConfig, ConfigError, ReadError, ReadingAccessor, Readings, SensorResource,
    Snapshot, ValueCache,
};
use uplink_bridge_proto::DeviceTopic;

/// Subscribes to one device's uplinks and serves the latest value.
#[derive(Debug)]
pub struct MqttSensorBridge {
    config: BridgeConfig,
    settings: ConnectionSettings,
    cache: Arc<ValueCache>,
    accessor: ReadingAccessor,
    connection: Option<ConnectionManager>,
}

impl MqttSensorBridge {
    /// Create a bridge without connecting.
    #[must_use]
    pub fn new(config: BridgeConfig, settings: ConnectionSettings) -> Self {
        let cache = Arc::new(ValueCache::new());
        let accessor = ReadingAccessor::new(Arc::clone(&cache), config.output().clone());
        Self {
            config,
            settings,
            cache,
            accessor,
            connection: None,
        }
    }

    /// Validate attributes, then create and start a bridge with custom settings.
    ///
    /// # Errors
    ///
    /// Returns error if the attributes are invalid or the session cannot start.
    pub fn create_with(
        attributes: &Attributes,
        settings: ConnectionSettings,
    ) -> Result<Self, BridgeError> {
        let config = BridgeConfig::from_attributes(attributes)?;
        let mut bridge = Self::new(config, settings);
        bridge.start()?;
        tracing::info!(model = Self::MODEL, dev_id = bridge.config.dev_id(), "Bridge created");
        Ok(bridge)
    }

    /// Start the broker session. A running session is replaced.
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot start; a running session is kept.
    pub fn start(&mut self) -> Result<(), ConnectionError> {
        let connection = ConnectionManager::start(&self.config, &self.cache, &self.settings)?;
        self.stop();
        self.connection = Some(connection);
        Ok(())
    }

    /// Stop the broker session, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop();
        }
    }

    /// Stop the session and wait for its task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop();
            connection.join().await;
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// A reader over this bridge's cache.
    #[must_use]
    pub fn accessor(&self) -> ReadingAccessor {
        self.accessor.clone()
    }

    /// Unlabelled snapshot of the cache.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.accessor.snapshot()
    }

    /// Session state; `Closed` when no session is running.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Closed, ConnectionManager::state)
    }

    /// The running session, if any.
    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionManager> {
        self.connection.as_ref()
    }
}

impl SensorResource for MqttSensorBridge {
    const MODEL: &'static str = "uplink-bridge:sensor:mqtt-uplink";

    type Error = BridgeError;

    fn validate(attributes: &Attributes) -> Vec<ConfigError> {
        BridgeConfig::validate(attributes)
    }

    fn create(attributes: &Attributes) -> Result<Self, BridgeError> {
        Self::create_with(attributes, ConnectionSettings::default())
    }

    fn reconfigure(&mut self, attributes: &Attributes) -> Result<(), BridgeError> {
        let config = BridgeConfig::from_attributes(attributes)?;

        // A reading for another device, field or shape must not be served.
        let reset = config.output() != self.config.output()
            || DeviceTopic::from_config(&config) != DeviceTopic::from_config(&self.config);
        let cache = if reset {
            Arc::new(ValueCache::new())
        } else {
            Arc::clone(&self.cache)
        };

        let connection = ConnectionManager::start(&config, &cache, &self.settings)?;
        self.stop();
        self.connection = Some(connection);

        if reset {
            self.accessor = ReadingAccessor::new(Arc::clone(&cache), config.output().clone());
            self.cache = cache;
            tracing::info!("Device or output mode changed, cached reading discarded");
        }

        self.config = config;
        tracing::info!(dev_id = self.config.dev_id(), "Bridge reconfigured");
        Ok(())
    }

    fn read(&self) -> Result<Readings, ReadError> {
        self.accessor.get_reading()
    }

    fn close(&mut self) {
        if self.connection.is_some() {
            self.stop();
            tracing::info!(model = Self::MODEL, "Bridge closed");
        }
    }
}

/// Errors creating or reconfiguring a bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Invalid attributes
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Session could not start
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn ca_bundle() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate").unwrap();
        file
    }

    fn attributes(ca: &NamedTempFile, parameter: &str) -> Attributes {
        json!({
            "broker": "127.0.0.1",
            "port": 1,
            "username": "demo-app@ttn",
            "password": "secret",
            "tenant_id": "ttn",
            "app_id": "demo-app",
            "dev_id": "eui-0001",
            "payload_parameter": parameter,
            "ca_file": ca.path().to_string_lossy()
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            reconnect_delay: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn deliver(bridge: &MqttSensorBridge, decoded_payload: &Value, received_at: &str) {
        let payload = serde_json::to_vec(&json!({
            "received_at": received_at,
            "uplink_message": {"decoded_payload": decoded_payload}
        }))
        .unwrap();
        let connection = bridge.connection().unwrap();
        connection.handler().handle(connection.topic(), &payload);
    }

    #[test]
    fn validate_reports_bad_attributes() {
        let errors = MqttSensorBridge::validate(&Attributes::new());
        assert!(errors.iter().any(|e| e.key() == "broker"));
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let ca = ca_bundle();
        let mut attrs = attributes(&ca, "current");
        attrs.insert("port".into(), json!("not-a-port"));

        let err = MqttSensorBridge::create(&attrs).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ref e) if e.key() == "port"));
    }

    #[tokio::test]
    async fn read_before_data_reports_no_data() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();

        assert_eq!(bridge.read(), Err(ReadError::NoDataAvailable));
        bridge.close();
    }

    #[tokio::test]
    async fn end_to_end_field_mode() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();

        deliver(&bridge, &json!({"current": 4.2}), "T1");
        assert_eq!(
            Value::Object(bridge.read().unwrap()),
            json!({"current :": 4.2, "Time: ": "T1"})
        );

        deliver(&bridge, &json!({"current": 0}), "T2");
        assert_eq!(
            Value::Object(bridge.read().unwrap()),
            json!({"current :": 4.2, "Time: ": "T1"})
        );

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn end_to_end_whole_payload_mode() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, ""), settings()).unwrap();

        deliver(&bridge, &json!({"a": 1, "b": 2}), "T1");
        assert_eq!(
            Value::Object(bridge.read().unwrap()),
            json!({"Total payload: ": {"a": 1, "b": 2}})
        );

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_reading() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();
        deliver(&bridge, &json!({"current": 1.0}), "T1");

        bridge.close();
        bridge.close();

        assert_eq!(bridge.connection_state(), ConnectionState::Closed);
        assert_eq!(bridge.snapshot().value(), &json!(1.0));
    }

    #[tokio::test]
    async fn reconfigure_keeps_reading_for_same_field() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();
        deliver(&bridge, &json!({"current": 2.5}), "T1");

        let old_handler = bridge.connection().unwrap().handler().clone();

        let mut attrs = attributes(&ca, "current");
        attrs.insert("keep_alive_secs".into(), json!(30));
        bridge.reconfigure(&attrs).unwrap();

        assert_eq!(bridge.config().keep_alive(), Duration::from_secs(30));
        assert_eq!(bridge.snapshot().value(), &json!(2.5));

        // The previous session can no longer write.
        let late = serde_json::to_vec(&json!({
            "received_at": "T2",
            "uplink_message": {"decoded_payload": {"current": 9.0}}
        }))
        .unwrap();
        old_handler.handle(old_handler.topic(), &late);
        assert_eq!(bridge.snapshot().value(), &json!(2.5));

        deliver(&bridge, &json!({"current": 3.5}), "T3");
        assert_eq!(bridge.snapshot().timestamp(), "T3");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn reconfigure_to_other_field_discards_reading() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();
        deliver(&bridge, &json!({"current": 2.5}), "T1");

        bridge.reconfigure(&attributes(&ca, "voltage")).unwrap();
        assert_eq!(bridge.read(), Err(ReadError::NoDataAvailable));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn reconfigure_to_other_device_discards_reading() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();
        deliver(&bridge, &json!({"current": 4.2}), "T1");

        let mut attrs = attributes(&ca, "current");
        attrs.insert("dev_id".into(), json!("eui-0002"));
        bridge.reconfigure(&attrs).unwrap();

        assert_eq!(bridge.connection().unwrap().topic(), "v3/demo-app@ttn/devices/eui-0002/up");
        assert_eq!(bridge.read(), Err(ReadError::NoDataAvailable));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn reconfigure_that_cannot_start_keeps_old_session() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();
        deliver(&bridge, &json!({"current": 2.5}), "T1");

        let mut attrs = attributes(&ca, "current");
        attrs.insert("ca_file".into(), json!("/nonexistent/ca.pem"));
        let err = bridge.reconfigure(&attrs).unwrap_err();

        assert!(matches!(err, BridgeError::Connection(ConnectionError::Tls(_))));
        assert!(bridge.connection().is_some());
        assert_ne!(bridge.connection_state(), ConnectionState::Closed);
        assert_eq!(bridge.config().ca_file(), Some(ca.path()));

        // The old session still writes.
        deliver(&bridge, &json!({"current": 3.5}), "T2");
        assert_eq!(bridge.snapshot().value(), &json!(3.5));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_reconfigure_leaves_bridge_running() {
        let ca = ca_bundle();
        let mut bridge = MqttSensorBridge::create_with(&attributes(&ca, "current"), settings()).unwrap();

        let mut attrs = attributes(&ca, "current");
        attrs.remove("dev_id");
        assert!(bridge.reconfigure(&attrs).is_err());

        assert!(bridge.connection().is_some());
        assert_eq!(bridge.config().dev_id(), "eui-0001");

        bridge.shutdown().await;
    }
}
