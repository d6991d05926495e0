//! Agent configuration.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use uplink_bridge_core::config::ATTRIBUTE_KEYS;
use uplink_bridge_core::Attributes;
use uplink_bridge_mqtt::ConnectionSettings;

/// Optional bridge attributes that may also come from the environment.
const OPTIONAL_KEYS: [&str; 3] = ["client_id", "keep_alive_secs", "ca_file"];

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Attribute set handed to the bridge
    pub attributes: Attributes,

    /// How often the agent reads and logs the current value
    pub poll_interval: Duration,

    /// Session tuning
    pub connection: ConnectionSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            attributes: Attributes::new(),
            poll_interval: Duration::from_secs(10),
            connection: ConnectionSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `UPLINK_BRIDGE_ATTRIBUTES`: path to a JSON file holding the attribute set
    /// - `UPLINK_BRIDGE_<KEY>`: single attribute, overriding the file
    ///   (e.g. `UPLINK_BRIDGE_BROKER`, `UPLINK_BRIDGE_PORT`, `UPLINK_BRIDGE_CA_FILE`)
    /// - `UPLINK_BRIDGE_POLL_SECS`: read interval in seconds
    /// - `UPLINK_BRIDGE_RECONNECT_SECS`: delay before reconnecting after an error
    ///
    /// Attribute validation is left to the bridge.
    ///
    /// # Errors
    ///
    /// Returns error if the attribute file cannot be read or a number is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("UPLINK_BRIDGE_ATTRIBUTES") {
            config.attributes = load_attributes(Path::new(&path))?;
        }

        for key in ATTRIBUTE_KEYS.iter().chain(OPTIONAL_KEYS.iter()) {
            let var = format!("UPLINK_BRIDGE_{}", key.to_uppercase());
            if let Some(value) = lookup(&var) {
                config.attributes.insert((*key).to_string(), Value::String(value));
            }
        }

        if let Some(secs) = lookup("UPLINK_BRIDGE_POLL_SECS") {
            let secs: u64 = secs.parse().context("Invalid UPLINK_BRIDGE_POLL_SECS")?;
            config.poll_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = lookup("UPLINK_BRIDGE_RECONNECT_SECS") {
            let secs: u64 = secs.parse().context("Invalid UPLINK_BRIDGE_RECONNECT_SECS")?;
            config.connection.reconnect_delay = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn load_attributes(path: &Path) -> Result<Attributes> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read attribute file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in attribute file {}", path.display()))?;

    match value {
        Value::Object(attributes) => Ok(attributes),
        _ => anyhow::bail!("Attribute file {} must hold a JSON object", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.attributes.is_empty());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.connection.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn file_with_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({"broker": "eu1.cloud.thethings.network", "port": 8883, "dev_id": "dev-a"})
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = AgentConfig::from_lookup(lookup(&[
            ("UPLINK_BRIDGE_ATTRIBUTES", path.as_str()),
            ("UPLINK_BRIDGE_DEV_ID", "dev-b"),
            ("UPLINK_BRIDGE_PAYLOAD_PARAMETER", "current"),
            ("UPLINK_BRIDGE_POLL_SECS", "30"),
            ("UPLINK_BRIDGE_RECONNECT_SECS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.attributes["broker"], json!("eu1.cloud.thethings.network"));
        assert_eq!(config.attributes["port"], json!(8883));
        assert_eq!(config.attributes["dev_id"], json!("dev-b"));
        assert_eq!(config.attributes["payload_parameter"], json!("current"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.connection.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn rejects_non_object_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        let path = file.path().to_string_lossy().to_string();

        assert!(AgentConfig::from_lookup(lookup(&[("UPLINK_BRIDGE_ATTRIBUTES", path.as_str())])).is_err());
    }

    #[test]
    fn rejects_bad_interval() {
        let result = AgentConfig::from_lookup(lookup(&[("UPLINK_BRIDGE_POLL_SECS", "soon")]));
        assert!(result.is_err());
    }
}
