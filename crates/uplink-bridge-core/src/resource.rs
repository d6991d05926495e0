//! Capability interface a host uses to drive a sensor resource.

use crate::config::{Attributes, ConfigError};
use crate::reading::{ReadError, Readings};
use serde_json::{Map, Value};

/// Lifecycle of a sensor resource as seen by the host.
///
/// The host validates attributes, creates an instance, may reconfigure it any
/// number of times, reads from it on demand and finally closes it.
pub trait SensorResource: Sized {
    /// Model identifier the host registers this resource under.
    const MODEL: &'static str;

    /// Error returned by `create` and `reconfigure`.
    type Error: std::error::Error + From<ConfigError>;

    /// Check an attribute set without side effects.
    fn validate(attributes: &Attributes) -> Vec<ConfigError>;

    /// Build and start an instance.
    ///
    /// # Errors
    ///
    /// Returns error if the attributes are invalid or the instance cannot start.
    fn create(attributes: &Attributes) -> Result<Self, Self::Error>;

    /// Replace the configuration wholesale.
    ///
    /// # Errors
    ///
    /// Returns error if the attributes are invalid; the running instance is
    /// left untouched in that case.
    fn reconfigure(&mut self, attributes: &Attributes) -> Result<(), Self::Error>;

    /// Latest reading.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::NoDataAvailable`] before the first valid value.
    fn read(&self) -> Result<Readings, ReadError>;

    /// Free-form command hook; resources without commands return an empty map.
    fn do_command(&mut self, _command: &Map<String, Value>) -> Map<String, Value> {
        Map::new()
    }

    /// Release every resource held. Must be idempotent.
    fn close(&mut self);
}
