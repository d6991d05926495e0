//! Bridge configuration and attribute validation.
//!
//! The host hands the bridge a flat attribute set (a JSON object). It is
//! validated once into an immutable [`BridgeConfig`]; reconfiguration builds a
//! new one rather than mutating the old.

use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Raw attribute set supplied by the host.
pub type Attributes = Map<String, Value>;

/// Attribute keys the host is expected to supply.
pub const ATTRIBUTE_KEYS: [&str; 8] = [
    "broker",
    "username",
    "password",
    "tenant_id",
    "app_id",
    "dev_id",
    "port",
    "payload_parameter",
];

const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// What the bridge extracts from each decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// A single named field of `decoded_payload`.
    Field(String),
    /// The whole `decoded_payload` mapping.
    WholePayload,
}

impl OutputMode {
    /// Build the mode from the `payload_parameter` attribute; empty means whole payload.
    #[must_use]
    pub fn from_parameter(parameter: &str) -> Self {
        if parameter.is_empty() {
            Self::WholePayload
        } else {
            Self::Field(parameter.to_string())
        }
    }

    /// Whether a specific field was requested.
    #[must_use]
    pub fn parameter_specified(&self) -> bool {
        matches!(self, Self::Field(_))
    }

    /// The requested field name, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name.as_str()),
            Self::WholePayload => None,
        }
    }
}

/// Validated, immutable bridge configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    broker: String,
    port: u16,
    username: String,
    password: String,
    tenant_id: String,
    app_id: String,
    dev_id: String,
    output: OutputMode,
    client_id: String,
    keep_alive: Duration,
    ca_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Validate an attribute set into a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, in [`ATTRIBUTE_KEYS`] order.
    pub fn from_attributes(attributes: &Attributes) -> Result<Self, ConfigError> {
        Self::parse(attributes).map_err(|mut errors| errors.swap_remove(0))
    }

    /// Collect every problem with an attribute set. Empty means valid.
    #[must_use]
    pub fn validate(attributes: &Attributes) -> Vec<ConfigError> {
        Self::parse(attributes).err().unwrap_or_default()
    }

    fn parse(attributes: &Attributes) -> Result<Self, Vec<ConfigError>> {
        let mut errors = Vec::new();

        let broker = collect(required_string(attributes, "broker"), &mut errors);
        let username = collect(required_string(attributes, "username"), &mut errors);
        let password = collect(required_string(attributes, "password"), &mut errors);
        let tenant_id = collect(required_string(attributes, "tenant_id"), &mut errors);
        let app_id = collect(required_string(attributes, "app_id"), &mut errors);
        let dev_id = collect(required_string(attributes, "dev_id"), &mut errors);
        let port = collect(parse_port(attributes.get("port")), &mut errors);
        let parameter = collect(
            optional_string(attributes, "payload_parameter"),
            &mut errors,
        );

        let host = match (&broker, port) {
            (Some(broker), Some(port)) => collect(broker_host(broker, port), &mut errors),
            _ => None,
        };

        let client_id = collect(optional_string(attributes, "client_id"), &mut errors);
        let keep_alive = collect(parse_keep_alive(attributes.get("keep_alive_secs")), &mut errors);
        let ca_file = collect(optional_string(attributes, "ca_file"), &mut errors);

        let (
            Some(host),
            Some(port),
            Some(username),
            Some(password),
            Some(tenant_id),
            Some(app_id),
            Some(dev_id),
            Some(parameter),
            Some(client_id),
            Some(keep_alive),
            Some(ca_file),
        ) = (
            host, port, username, password, tenant_id, app_id, dev_id, parameter, client_id,
            keep_alive, ca_file,
        )
        else {
            return Err(errors);
        };

        let client_id = if client_id.is_empty() {
            dev_id.clone()
        } else {
            client_id
        };

        Ok(Self {
            broker: host,
            port,
            username,
            password,
            tenant_id,
            app_id,
            dev_id,
            output: OutputMode::from_parameter(&parameter),
            client_id,
            keep_alive,
            ca_file: (!ca_file.is_empty()).then(|| PathBuf::from(ca_file)),
        })
    }

    /// Broker host name.
    #[must_use]
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Broker TLS port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Broker user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Broker password (API key).
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Network-server tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Application identifier.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// End-device identifier.
    #[must_use]
    pub fn dev_id(&self) -> &str {
        &self.dev_id
    }

    /// Extraction mode.
    #[must_use]
    pub fn output(&self) -> &OutputMode {
        &self.output
    }

    /// Whether `payload_parameter` named a field.
    #[must_use]
    pub fn parameter_specified(&self) -> bool {
        self.output.parameter_specified()
    }

    /// MQTT client identifier; the device id unless overridden.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// MQTT keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// PEM bundle that replaces the platform trust roots, if configured.
    #[must_use]
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("app_id", &self.app_id)
            .field("dev_id", &self.dev_id)
            .field("output", &self.output)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("ca_file", &self.ca_file)
            .finish()
    }
}

fn collect<T>(result: Result<T, ConfigError>, errors: &mut Vec<ConfigError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            errors.push(err);
            None
        }
    }
}

fn required_string(attributes: &Attributes, key: &str) -> Result<String, ConfigError> {
    match attributes.get(key) {
        None | Some(Value::Null) => Err(ConfigError::Missing(key.to_string())),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(ConfigError::Empty(key.to_string()))
        }
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_string(),
            expected: "string",
        }),
    }
}

/// Absent and blank both yield an empty string.
fn optional_string(attributes: &Attributes, key: &str) -> Result<String, ConfigError> {
    match attributes.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_string(),
            expected: "string",
        }),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integer_attribute(key: &str, value: &Value) -> Result<i64, ConfigError> {
    let wrong_type = || ConfigError::WrongType {
        key: key.to_string(),
        expected: "integer",
    };

    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            // Hosts that carry every number as a double.
            match number.as_f64() {
                Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => Ok(float as i64),
                _ => Err(wrong_type()),
            }
        }
        Value::String(text) if text.trim().is_empty() => Err(ConfigError::Empty(key.to_string())),
        Value::String(text) => text.trim().parse().map_err(|_| wrong_type()),
        _ => Err(wrong_type()),
    }
}

fn parse_port(value: Option<&Value>) -> Result<u16, ConfigError> {
    let value = match value {
        None | Some(Value::Null) => return Err(ConfigError::Missing("port".to_string())),
        Some(value) => value,
    };

    let port = integer_attribute("port", value)?;
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::OutOfRange {
            key: "port".to_string(),
            value: port.to_string(),
        })
}

fn parse_keep_alive(value: Option<&Value>) -> Result<Duration, ConfigError> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS)),
        Some(value) => value,
    };

    let secs = integer_attribute("keep_alive_secs", value)?;
    u64::try_from(secs)
        .ok()
        .filter(|secs| *secs >= 1)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::OutOfRange {
            key: "keep_alive_secs".to_string(),
            value: secs.to_string(),
        })
}

/// Reduce the `broker` attribute to a host name.
///
/// Accepts a bare host or a URL with a TLS scheme (`mqtts`, `ssl`, `tls`).
/// A port embedded in the URL must agree with the `port` attribute.
fn broker_host(input: &str, port: u16) -> Result<String, ConfigError> {
    if !input.contains("://") {
        if input.contains(['/', ':']) || input.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidBroker(format!(
                "{input}: expected a host name; set the port with the port attribute"
            )));
        }
        return Ok(input.to_string());
    }

    let url = Url::parse(input).map_err(|e| ConfigError::InvalidBroker(format!("{input}: {e}")))?;

    match url.scheme() {
        "mqtts" | "ssl" | "tls" => {}
        scheme => {
            return Err(ConfigError::InvalidBroker(format!(
                "{input}: unsupported scheme '{scheme}', a TLS scheme is required"
            )));
        }
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::InvalidBroker(format!("{input}: missing host")))?;

    if let Some(url_port) = url.port() {
        if url_port != port {
            return Err(ConfigError::InvalidBroker(format!(
                "{input}: port {url_port} conflicts with port attribute {port}"
            )));
        }
    }

    Ok(host.to_string())
}

/// Errors raised while validating the attribute set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required attribute is absent
    #[error("missing required attribute '{0}'")]
    Missing(String),
    /// A required attribute is an empty string
    #[error("attribute '{0}' must not be empty")]
    Empty(String),
    /// An attribute has the wrong JSON type
    #[error("attribute '{key}' must be a {expected}")]
    WrongType {
        /// Offending key
        key: String,
        /// Expected type name
        expected: &'static str,
    },
    /// A numeric attribute is outside its allowed range
    #[error("attribute '{key}' is out of range: {value}")]
    OutOfRange {
        /// Offending key
        key: String,
        /// Rejected value
        value: String,
    },
    /// The broker address cannot be used
    #[error("invalid broker address: {0}")]
    InvalidBroker(String),
}

impl ConfigError {
    /// The attribute key this error refers to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Missing(key) | Self::Empty(key) => key.as_str(),
            Self::WrongType { key, .. } | Self::OutOfRange { key, .. } => key.as_str(),
            Self::InvalidBroker(_) => "broker",
        }
    }
}
