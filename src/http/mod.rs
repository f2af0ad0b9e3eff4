//! WebSocket (WS/WSS) listener subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, upgrade route, TLS via axum-server)
//!     → acceptor.rs (client certificate subject as a request extension)
//!     → websocket.rs (upgrade, socket adapters, upstream dial)
//!     → session relay
//! ```

pub mod acceptor;
pub mod server;
pub mod websocket;

pub use acceptor::ClientCertificate;
pub use server::WsProxy;
pub use websocket::WsDial;
