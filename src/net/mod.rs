//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake material)
//!     → connection.rs (connection id, active tracking)
//!     → Hand off to the session relay
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - TLS material is loaded once and shared by every TLS listener

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use tls::{load_tls_config, peer_subject, TlsError};
