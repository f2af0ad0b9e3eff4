//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → TLS material (if enabled) → Start listener pair + interrupt watcher
//!
//! Shutdown (shutdown.rs):
//!     First listener failure or interrupt → Abort remaining tasks → Exit
//!
//! Signals (signals.rs):
//!     SIGINT → Interrupted termination
//! ```
//!
//! # Design Decisions
//! - TLS material is loaded before any port is bound
//! - The first terminal outcome wins; later ones are discarded
//! - No connection draining on exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{ListenerKind, Reporter, Shutdown, Termination};
pub use startup::{planned_listeners, Orchestrator, StartupError};
