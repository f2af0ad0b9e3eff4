//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (MPROXY_* environment overlay)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - An unparsable TLS toggle is fatal, never silently defaulted

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env, load, load_config, ConfigError};
pub use schema::{
    LimitsConfig, LogConfig, MqttConfig, ObservabilityConfig, ProxyConfig, TlsConfig, WsConfig,
    WsTargetConfig,
};
pub use validation::{validate_config, ValidationError};
