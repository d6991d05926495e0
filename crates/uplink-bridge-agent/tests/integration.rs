use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, TlsConfiguration, Transport};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use uplink_bridge_core::{Attributes, SensorResource};
use uplink_bridge_mqtt::{ConnectionSettings, ConnectionState, MqttSensorBridge};
use uplink_bridge_proto::DeviceTopic;
use uuid::Uuid;

async fn spawn_eventloop(mut eventloop: EventLoop) {
    loop {
        if eventloop.poll().await.is_err() {
            break;
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Publishes an uplink through a TLS broker and reads it back from the bridge.
///
/// Needs `UPLINK_BRIDGE_INTEGRATION=1`, a TLS broker (`UPLINK_BRIDGE_MQTT_HOST`,
/// `UPLINK_BRIDGE_MQTT_PORT`) and the CA that signed its certificate
/// (`UPLINK_BRIDGE_CA_FILE`).
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uplink_roundtrip_over_tls() {
    if std::env::var("UPLINK_BRIDGE_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set UPLINK_BRIDGE_INTEGRATION=1 to run");
        return;
    }

    let host = env_or("UPLINK_BRIDGE_MQTT_HOST", "localhost");
    let port: u16 = env_or("UPLINK_BRIDGE_MQTT_PORT", "8883").parse().unwrap();
    let ca_file = std::env::var("UPLINK_BRIDGE_CA_FILE").expect("UPLINK_BRIDGE_CA_FILE must be set");
    let username = env_or("UPLINK_BRIDGE_MQTT_USERNAME", "integration");
    let password = env_or("UPLINK_BRIDGE_MQTT_PASSWORD", "integration");

    let dev_id = format!("eui-{}", Uuid::new_v4().simple());
    let attributes: Attributes = json!({
        "broker": host,
        "port": port,
        "username": username,
        "password": password,
        "tenant_id": "integration",
        "app_id": "uplink-bridge",
        "dev_id": dev_id,
        "payload_parameter": "current",
        "ca_file": ca_file
    })
    .as_object()
    .cloned()
    .unwrap();

    let settings = ConnectionSettings {
        reconnect_delay: Duration::from_millis(200),
        ..Default::default()
    };
    let mut bridge = MqttSensorBridge::create_with(&attributes, settings).unwrap();

    let mut states = bridge.connection().unwrap().subscribe_state();
    timeout(
        Duration::from_secs(10),
        states.wait_for(|state| *state == ConnectionState::Subscribed),
    )
    .await
    .expect("timeout waiting for subscription")
    .unwrap();

    let ca = std::fs::read(&ca_file).unwrap();
    let mut pub_opts = MqttOptions::new(format!("pub-{}", Uuid::new_v4()), host, port);
    pub_opts.set_keep_alive(Duration::from_secs(5));
    pub_opts.set_credentials(username, password);
    pub_opts.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: None,
    }));
    let (pub_client, pub_eventloop) = AsyncClient::new(pub_opts, 10);
    tokio::spawn(spawn_eventloop(pub_eventloop));

    let topic = DeviceTopic::new("integration", "uplink-bridge", dev_id.as_str()).uplink();
    let payload = json!({
        "received_at": "2024-05-01T12:00:00Z",
        "uplink_message": {"decoded_payload": {"current": 4.2}}
    });
    pub_client
        .publish(&topic, QoS::AtLeastOnce, false, serde_json::to_vec(&payload).unwrap())
        .await
        .unwrap();

    let readings = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(readings) = bridge.read() {
                break readings;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("timeout waiting for uplink");

    assert_eq!(
        serde_json::Value::Object(readings),
        json!({"current :": 4.2, "Time: ": "2024-05-01T12:00:00Z"})
    );

    bridge.shutdown().await;
    bridge.close();
}
