//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports non-zero, limits > 0)
//! - Check that the upstream WebSocket target forms a usable URL
//! - Require TLS material when TLS mode is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ProxyConfig;
use crate::mqtt::packet::MAX_REMAINING_LENGTH;

/// Largest frame MQTT can express: fixed header byte, 4 length bytes, body.
const MAX_FRAME_SIZE: usize = 1 + 4 + MAX_REMAINING_LENGTH;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be 0")]
    ZeroPort { field: &'static str },

    #[error("{field} must start with '/', got {value:?}")]
    InvalidPath { field: &'static str, value: String },

    #[error("ws.target.scheme must be \"ws\" or \"wss\", got {0:?}")]
    InvalidScheme(String),

    #[error("upstream WebSocket target {url:?} is not a valid URL: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("limits.max_connections must be greater than 0")]
    ZeroConnections,

    #[error("limits.max_packet_size must be between 2 and {max}, got {value}")]
    InvalidPacketSize { value: usize, max: usize },

    #[error("tls.{0} is required when client TLS is enabled")]
    MissingTlsMaterial(&'static str),
}

/// Validate a configuration snapshot.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let ports = [
        ("ws.port", config.ws.port),
        ("ws.wss_port", config.ws.wss_port),
        ("ws.target.port", config.ws.target.port),
        ("mqtt.port", config.mqtt.port),
        ("mqtt.mqtts_port", config.mqtt.mqtts_port),
        ("mqtt.target_port", config.mqtt.target_port),
    ];
    for (field, port) in ports {
        if port == 0 {
            errors.push(ValidationError::ZeroPort { field });
        }
    }

    let paths = [
        ("ws.path", &config.ws.path),
        ("ws.wss_path", &config.ws.wss_path),
        ("ws.target.path", &config.ws.target.path),
    ];
    for (field, path) in paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::InvalidPath {
                field,
                value: path.clone(),
            });
        }
    }

    match config.ws.target.scheme.as_str() {
        "ws" | "wss" => {
            let url = config.ws_target_url();
            if let Err(e) = url::Url::parse(&url) {
                errors.push(ValidationError::InvalidTarget {
                    url,
                    reason: e.to_string(),
                });
            }
        }
        other => errors.push(ValidationError::InvalidScheme(other.to_string())),
    }

    if config.limits.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    let packet_size = config.limits.max_packet_size;
    if !(2..=MAX_FRAME_SIZE).contains(&packet_size) {
        errors.push(ValidationError::InvalidPacketSize {
            value: packet_size,
            max: MAX_FRAME_SIZE,
        });
    }

    if config.tls.client_tls {
        if config.tls.server_cert.is_empty() {
            errors.push(ValidationError::MissingTlsMaterial("server_cert"));
        }
        if config.tls.server_key.is_empty() {
            errors.push(ValidationError::MissingTlsMaterial("server_key"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
