//! MQTT session ownership: TLS, subscription, reconnects and shutdown.
//!
//! One Tokio task drives the rumqttc event loop. It subscribes on every
//! successful ConnAck (the session is clean, so subscriptions do not survive a
//! reconnect) and feeds each publish to an [`UplinkHandler`]. Transport errors
//! are logged and the loop keeps polling after `reconnect_delay`, which makes
//! rumqttc reconnect.

use crate::handler::UplinkHandler;
use rumqttc::{
    AsyncClient, ConnectionError as TransportError, Event, EventLoop,
    MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uplink_bridge_core::{BridgeConfig, CacheWriter, ValueCache};
use uplink_bridge_proto::{DeviceTopic, UplinkDecoder};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport connection
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// Broker accepted the connection
    Connected,
    /// Broker acknowledged the uplink subscription
    Subscribed,
    /// Stopped; terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session tuning that is not part of the host-facing attributes.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Pause between a transport error and the next connection attempt
    pub reconnect_delay: Duration,
    /// Capacity of the client request queue
    pub request_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            request_capacity: 100,
        }
    }
}

/// Owner of the MQTT session for one bridge.
pub struct ConnectionManager {
    handler: UplinkHandler,
    writer: Arc<CacheWriter>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start the session task.
    ///
    /// Returns as soon as the task is spawned; connecting and subscribing
    /// happen in the background. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS configuration cannot be built or no runtime
    /// is available. Broker and network failures are retried, not returned.
    /// On error no writer is issued, so a session already feeding `cache`
    /// keeps running.
    pub fn start(
        config: &BridgeConfig,
        cache: &Arc<ValueCache>,
        settings: &ConnectionSettings,
    ) -> Result<Self, ConnectionError> {
        let runtime = Handle::try_current().map_err(|e| ConnectionError::Runtime(e.to_string()))?;

        let topic = DeviceTopic::from_config(config).uplink();

        let mut mqtt_options = MqttOptions::new(config.client_id(), config.broker(), config.port());
        mqtt_options.set_keep_alive(config.keep_alive());
        mqtt_options.set_credentials(config.username(), config.password());
        mqtt_options.set_clean_session(true);
        mqtt_options.set_transport(tls_transport(config.ca_file())?);

        let (client, eventloop) = AsyncClient::new(mqtt_options, settings.request_capacity);

        // Issuing the writer supersedes any earlier session on this cache.
        let writer = Arc::new(cache.writer());
        let handler = UplinkHandler::new(
            topic,
            UplinkDecoder::new(config.output().clone()),
            Arc::clone(&writer),
        );

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let (shutdown, shutdown_rx) = watch::channel(false);

        tracing::info!(
            broker = config.broker(),
            port = config.port(),
            client_id = config.client_id(),
            topic = handler.topic(),
            "Starting MQTT session"
        );

        let session = Session {
            client,
            eventloop,
            handler: handler.clone(),
            state: Arc::clone(&state),
            shutdown: shutdown_rx,
            reconnect_delay: settings.reconnect_delay,
            connected: false,
        };
        let task = runtime.spawn(session.run());

        Ok(Self {
            handler,
            writer,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop the session.
    ///
    /// Idempotent and callable from any thread. Once it returns no message,
    /// including one already being decoded, can change the cache. The
    /// disconnect itself completes in the background; await [`Self::join`] to
    /// wait for it.
    pub fn stop(&self) {
        self.writer.revoke();
        let previous = self.state.send_replace(ConnectionState::Closed);
        self.shutdown.send_replace(true);

        if previous != ConnectionState::Closed {
            tracing::info!(topic = self.handler.topic(), "Stopping MQTT session");
        }
    }

    /// Wait for the session task to finish. Returns immediately if already joined.
    pub async fn join(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "MQTT session task failed");
            }
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch session state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribed uplink topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.handler.topic()
    }

    /// The handler publishes are routed to.
    #[must_use]
    pub fn handler(&self) -> &UplinkHandler {
        &self.handler
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("topic", &self.handler.topic())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// State owned by the session task.
struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    handler: UplinkHandler,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
    reconnect_delay: Duration,
    connected: bool,
}

impl Session {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handler.handle(&publish.topic, &publish.payload);
                }
                // Refused connections surface as `ConnectionRefused` errors.
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    self.connected = true;
                    self.set_state(ConnectionState::Connected);
                    self.request_subscription();
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        tracing::error!(topic = self.handler.topic(), "Subscription rejected by broker");
                    } else {
                        tracing::info!(topic = self.handler.topic(), "Subscription acknowledged");
                        self.set_state(ConnectionState::Subscribed);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    log_transport_error(&err);
                    self.connected = false;
                    self.set_state(ConnectionState::Disconnected);

                    tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => break,
                        () = tokio::time::sleep(self.reconnect_delay) => {}
                    }

                    tracing::debug!("Reconnecting to MQTT broker");
                    self.set_state(ConnectionState::Connecting);
                }
            }
        }

        self.disconnect().await;
        tracing::info!(topic = self.handler.topic(), "MQTT session stopped");
    }

    fn request_subscription(&self) {
        let topic = self.handler.topic();
        match self.client.try_subscribe(topic, QoS::AtLeastOnce) {
            Ok(()) => tracing::info!(topic, "Subscribing to uplink topic"),
            Err(err) => tracing::error!(error = %err, topic, "Failed to request subscription"),
        }
    }

    /// Move to `next` unless the session is already closed.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "Connection state change");
            *current = next;
            true
        });
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(err) = self.client.try_disconnect() {
            tracing::warn!(error = %err, "Failed to request disconnect");
            return;
        }

        let eventloop = &mut self.eventloop;
        let drain = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(DISCONNECT_TIMEOUT, drain).await.is_err() {
            tracing::warn!("Timed out sending disconnect to MQTT broker");
        }
        self.connected = false;
    }
}

fn log_transport_error(err: &TransportError) {
    match err {
        TransportError::ConnectionRefused(code) => {
            tracing::error!(code = ?code, "Connection refused by MQTT broker");
        }
        _ => tracing::error!(error = %err, "MQTT connection error"),
    }
}

/// TLS transport with certificate validation.
///
/// Uses the platform trust roots unless a CA bundle is configured. There is no
/// way to build a transport that skips validation.
fn tls_transport(ca_file: Option<&Path>) -> Result<Transport, ConnectionError> {
    let Some(ca_path) = ca_file else {
        return Ok(Transport::tls_with_default_config());
    };

    let ca = fs::read(ca_path).map_err(|e| {
        ConnectionError::Tls(format!(
            "failed to read CA bundle {}: {e}",
            ca_path.display()
        ))
    })?;
    tracing::debug!(ca_path = %ca_path.display(), "Loaded custom CA bundle");

    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: None,
    }))
}

/// Errors that prevent a session from starting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// TLS material could not be loaded
    #[error("TLS setup error: {0}")]
    Tls(String),
    /// No Tokio runtime to run the session on
    #[error("runtime error: {0}")]
    Runtime(String),
}
