//! MQTT and MQTT-over-WebSocket proxy library

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mqtt;
pub mod net;
pub mod observability;
pub mod session;

pub use config::schema::ProxyConfig;
pub use http::WsProxy;
pub use lifecycle::{Orchestrator, Termination};
pub use mqtt::MqttProxy;
pub use session::{Client, Handler, LogHandler};
