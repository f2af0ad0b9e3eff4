//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Derive the filter from `MPROXY_LOG_LEVEL`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG`, when set, takes precedence over the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Error type for logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level {level:?}: {source}")]
    Filter {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter directives for a configured verbosity level.
pub fn directives(level: &str) -> String {
    format!("mqtt_proxy={level},tower_http={level}")
}

/// Install the global subscriber.
pub fn init(level: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(level)).map_err(|source| LoggingError::Filter {
            level: level.to_string(),
            source,
        })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
