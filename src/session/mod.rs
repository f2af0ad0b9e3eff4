//! Client sessions: identity, the handler contract, and the relay.
//!
//! # Data Flow
//! ```text
//! Listener (MQTT/MQTTS/WS/WSS)
//!     → transport.rs (wrap socket as byte stream + sink)
//!     → relay.rs (CONNECT → auth → dial upstream → relay loop)
//!         ↔ handler.rs (auth gates and notifications)
//!     → upstream broker via a Dial implementation
//! ```
//!
//! # Design Decisions
//! - One relay implementation for both protocol families
//! - The handler is a trait object shared by every connection

pub mod client;
pub mod handler;
pub mod log_handler;
pub mod relay;
pub mod transport;

pub use client::{Client, PeerInfo};
pub use handler::{AuthError, Handler};
pub use log_handler::LogHandler;
pub use relay::{serve, SessionError};
pub use transport::{ByteSink, ByteStream, Dial, Transport};
