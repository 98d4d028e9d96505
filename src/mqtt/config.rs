use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection settings
///
/// Read once at start-up. The broker address is not changed while the
/// application runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Client ids are `<prefix>-<hex nanos>`
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    /// Largest accepted packet in bytes. Photos easily exceed the client default.
    pub max_packet_size: usize,
    /// Capacity of the MQTT request and session command channels
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id_prefix: "animal-photos".to_string(),
            keep_alive_secs: 60,
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 5_000,
            max_packet_size: 10 * 1024 * 1024,
            channel_capacity: 100,
        }
    }
}

impl MqttConfig {
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Fresh client id for a new session
    pub fn generate_client_id(&self) -> String {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        format!("{}-{:x}", self.client_id_prefix, nanos)
    }
}
