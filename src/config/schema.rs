//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every field carries a default so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};

use crate::mqtt::packet::DEFAULT_MAX_PACKET_SIZE;

/// Root configuration for the MQTT proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// WebSocket listener pair (WS/WSS) and its upstream target.
    pub ws: WsConfig,

    /// MQTT listener pair (MQTT/MQTTS) and its upstream broker.
    pub mqtt: MqttConfig,

    /// TLS mode toggle and material paths.
    pub tls: TlsConfig,

    /// Logging settings.
    pub log: LogConfig,

    /// Connection limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Address the plaintext MQTT listener binds to.
    pub fn mqtt_address(&self) -> String {
        format!("{}:{}", self.mqtt.host, self.mqtt.port)
    }

    /// Address the TLS MQTT listener binds to.
    pub fn mqtts_address(&self) -> String {
        format!("{}:{}", self.mqtt.host, self.mqtt.mqtts_port)
    }

    /// Upstream broker address for raw MQTT traffic.
    pub fn mqtt_target(&self) -> String {
        format!("{}:{}", self.mqtt.target_host, self.mqtt.target_port)
    }

    /// Upstream WebSocket URL, e.g. `ws://localhost:8888/mqtt`.
    pub fn ws_target_url(&self) -> String {
        let t = &self.ws.target;
        format!("{}://{}:{}{}", t.scheme, t.host, t.port, t.path)
    }
}

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WsConfig {
    /// Interface both WS and WSS bind to.
    pub host: String,

    /// Plaintext WebSocket port.
    pub port: u16,

    /// Upgrade path for the plaintext listener.
    pub path: String,

    /// TLS WebSocket port.
    pub wss_port: u16,

    /// Upgrade path for the TLS listener.
    pub wss_path: String,

    /// Upstream WebSocket endpoint.
    pub target: WsTargetConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
            path: "/mqtt".to_string(),
            wss_port: 8081,
            wss_path: "/mqtt".to_string(),
            target: WsTargetConfig::default(),
        }
    }
}

/// Upstream WebSocket endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WsTargetConfig {
    /// `ws` or `wss`.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for WsTargetConfig {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "localhost".to_string(),
            port: 8888,
            path: "/mqtt".to_string(),
        }
    }
}

/// MQTT listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    /// Interface both MQTT and MQTTS bind to.
    pub host: String,

    /// Plaintext MQTT port.
    pub port: u16,

    /// TLS MQTT port.
    pub mqtts_port: u16,

    /// Upstream broker host.
    pub target_host: String,

    /// Upstream broker port.
    pub target_port: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1884,
            mqtts_port: 8883,
            target_host: "localhost".to_string(),
            target_port: 1883,
        }
    }
}

/// TLS mode and certificate material.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    /// When set, only the TLS listeners (WSS, MQTTS) start.
    pub client_tls: bool,

    /// CA bundle used to verify client certificates (PEM). Empty disables client auth.
    pub ca_certs: String,

    /// Server certificate chain (PEM).
    pub server_cert: String,

    /// Server private key (PEM).
    pub server_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Verbosity: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
        }
    }
}

/// Connection and packet limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections per listener, MQTT and WS alike.
    pub max_connections: usize,

    /// Largest MQTT frame accepted from a client, in bytes.
    pub max_packet_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Prometheus scrape address, e.g. `0.0.0.0:9090`. Unset disables the exporter.
    pub metrics_address: Option<String>,
}
