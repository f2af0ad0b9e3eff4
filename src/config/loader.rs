//! Configuration loading from disk and from the environment.
//!
//! A config file is optional. The `MPROXY_*` environment variables are
//! applied on top of whatever the file (or the defaults) provided; an unset
//! or empty variable leaves the existing value in place.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_WS_HOST: &str = "MPROXY_WS_HOST";
pub const ENV_WS_PORT: &str = "MPROXY_WS_PORT";
pub const ENV_WS_PATH: &str = "MPROXY_WS_PATH";
pub const ENV_WSS_PORT: &str = "MPROXY_WSS_PORT";
pub const ENV_WSS_PATH: &str = "MPROXY_WSS_PATH";
pub const ENV_WS_TARGET_SCHEME: &str = "MPROXY_WS_TARGET_SCHEME";
pub const ENV_WS_TARGET_HOST: &str = "MPROXY_WS_TARGET_HOST";
pub const ENV_WS_TARGET_PORT: &str = "MPROXY_WS_TARGET_PORT";
pub const ENV_WS_TARGET_PATH: &str = "MPROXY_WS_TARGET_PATH";

pub const ENV_MQTT_HOST: &str = "MPROXY_MQTT_HOST";
pub const ENV_MQTT_PORT: &str = "MPROXY_MQTT_PORT";
pub const ENV_MQTTS_PORT: &str = "MPROXY_MQTTS_PORT";
pub const ENV_MQTT_TARGET_HOST: &str = "MPROXY_MQTT_TARGET_HOST";
pub const ENV_MQTT_TARGET_PORT: &str = "MPROXY_MQTT_TARGET_PORT";

pub const ENV_CLIENT_TLS: &str = "MPROXY_CLIENT_TLS";
pub const ENV_CA_CERTS: &str = "MPROXY_CA_CERTS";
pub const ENV_SERVER_CERT: &str = "MPROXY_SERVER_CERT";
pub const ENV_SERVER_KEY: &str = "MPROXY_SERVER_KEY";

pub const ENV_LOG_LEVEL: &str = "MPROXY_LOG_LEVEL";
pub const ENV_MAX_CONNECTIONS: &str = "MPROXY_MAX_CONNECTIONS";
pub const ENV_MAX_PACKET_SIZE: &str = "MPROXY_MAX_PACKET_SIZE";
pub const ENV_METRICS_ADDR: &str = "MPROXY_METRICS_ADDR";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value passed for {key}: {value:?} is not a boolean")]
    InvalidBool { key: &'static str, value: String },

    #[error("Invalid value passed for {key}: {value:?} is not a number")]
    InvalidNumber { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse configuration from a TOML file.
///
/// The result is not validated: the environment overlay may still complete it.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Build the effective configuration: file (or defaults), then the
/// `MPROXY_*` overlay from `lookup`, then validation of the result.
pub fn load<F>(path: Option<&Path>, lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    let config = apply_env(base, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay `MPROXY_*` variables on `config`.
///
/// `lookup` abstracts the environment so callers (and tests) can supply
/// their own source.
pub fn apply_env<F>(mut config: ProxyConfig, lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    // WS
    set_string(&mut config.ws.host, get(ENV_WS_HOST));
    set_number(&mut config.ws.port, ENV_WS_PORT, get(ENV_WS_PORT))?;
    set_string(&mut config.ws.path, get(ENV_WS_PATH));
    set_number(&mut config.ws.wss_port, ENV_WSS_PORT, get(ENV_WSS_PORT))?;
    set_string(&mut config.ws.wss_path, get(ENV_WSS_PATH));
    set_string(&mut config.ws.target.scheme, get(ENV_WS_TARGET_SCHEME));
    set_string(&mut config.ws.target.host, get(ENV_WS_TARGET_HOST));
    set_number(&mut config.ws.target.port, ENV_WS_TARGET_PORT, get(ENV_WS_TARGET_PORT))?;
    set_string(&mut config.ws.target.path, get(ENV_WS_TARGET_PATH));

    // MQTT
    set_string(&mut config.mqtt.host, get(ENV_MQTT_HOST));
    set_number(&mut config.mqtt.port, ENV_MQTT_PORT, get(ENV_MQTT_PORT))?;
    set_number(&mut config.mqtt.mqtts_port, ENV_MQTTS_PORT, get(ENV_MQTTS_PORT))?;
    set_string(&mut config.mqtt.target_host, get(ENV_MQTT_TARGET_HOST));
    set_number(&mut config.mqtt.target_port, ENV_MQTT_TARGET_PORT, get(ENV_MQTT_TARGET_PORT))?;

    // TLS
    if let Some(value) = get(ENV_CLIENT_TLS) {
        config.tls.client_tls = parse_bool(&value).ok_or(ConfigError::InvalidBool {
            key: ENV_CLIENT_TLS,
            value,
        })?;
    }
    set_string(&mut config.tls.ca_certs, get(ENV_CA_CERTS));
    set_string(&mut config.tls.server_cert, get(ENV_SERVER_CERT));
    set_string(&mut config.tls.server_key, get(ENV_SERVER_KEY));

    // Log, limits, metrics
    set_string(&mut config.log.level, get(ENV_LOG_LEVEL));
    set_number(&mut config.limits.max_connections, ENV_MAX_CONNECTIONS, get(ENV_MAX_CONNECTIONS))?;
    set_number(&mut config.limits.max_packet_size, ENV_MAX_PACKET_SIZE, get(ENV_MAX_PACKET_SIZE))?;
    if let Some(addr) = get(ENV_METRICS_ADDR) {
        config.observability.metrics_address = Some(addr);
    }

    Ok(config)
}

/// Parse a boolean the way operators commonly spell it in env files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn set_string(slot: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn set_number<T: FromStr>(
    slot: &mut T,
    key: &'static str,
    value: Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = value {
        *slot = v
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: v })?;
    }
    Ok(())
}
