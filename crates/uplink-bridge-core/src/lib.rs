//! # uplink-bridge core
//!
//! Configuration, latest-value cache and read-side contract for the uplink
//! bridge.
//!
//! This crate provides:
//! - Attribute validation into an immutable [`BridgeConfig`]
//! - [`ValueCache`], the single shared slot between ingest and read paths,
//!   with its fallback-on-empty policy
//! - [`ReadingAccessor`], the synchronous read boundary used by hosts
//! - [`SensorResource`], the lifecycle interface a host drives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod reading;
pub mod resource;

pub use cache::{is_empty_value, CacheWriter, Reading, Snapshot, UpdateOutcome, ValueCache};
pub use config::{Attributes, BridgeConfig, ConfigError, OutputMode};
pub use reading::{ReadError, ReadingAccessor, Readings};
pub use resource::SensorResource;
