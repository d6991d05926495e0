//! # uplink-bridge agent
//!
//! Host process for one uplink bridge.
//!
//! ## Architecture
//!
//! Two concurrent paths share one value cache:
//! 1. **Ingest**: a Tokio task drives the TLS MQTT session, decodes each uplink
//!    and updates the cache
//! 2. **Read**: the agent polls the cache on an interval and logs the reading,
//!    the way a host framework would query a sensor

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

use config::AgentConfig;
use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting uplink-bridge agent"
    );

    let config = AgentConfig::from_env()?;

    Agent::new(config).run().await
}
