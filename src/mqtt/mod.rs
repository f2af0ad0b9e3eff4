//! MQTT protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Device ──TCP/TLS──▶ server.rs (MqttProxy accept loop)
//!     → codec.rs (split byte stream into frames)
//!     → packet.rs (extract CONNECT/PUBLISH/SUBSCRIBE fields)
//!     → session relay (auth gates, forward raw frame, notify)
//!     → upstream broker
//! ```
//!
//! # Design Decisions
//! - Frames are forwarded byte-for-byte; the parsed view is read-only
//! - Broker → device traffic is copied without inspection

pub mod codec;
pub mod packet;
pub mod server;

pub use codec::MqttCodec;
pub use packet::{Frame, Packet, PacketError};
pub use server::{MqttProxy, TcpDial};
