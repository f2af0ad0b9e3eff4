//! The authorization and notification contract.
//!
//! A single `Handler` instance is shared by every listener and every live
//! connection, so implementations must be `Send + Sync` and tolerate
//! concurrent calls for different clients. Calls for one client are never
//! concurrent: the relay awaits each one before reading the next packet.
//!
//! ```text
//! [unauthenticated] --CONNECT--> auth_connect
//!     ok   --> connect --> [connected]
//!     fail --> closed (no notifications)
//! [connected] --PUBLISH--> auth_publish --ok--> forward --> publish
//! [connected] --SUBSCRIBE--> auth_subscribe --ok--> forward --> subscribe
//! [connected] --UNSUBSCRIBE--> forward --> unsubscribe
//! [connected] --transport closed--> disconnect --> [terminated]
//! ```

use async_trait::async_trait;

use crate::session::client::Client;

/// Returned by an authorization gate to veto an action.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The handler's policy refuses the action.
    #[error("denied: {0}")]
    Denied(String),

    /// The handler could not reach a decision (e.g. its backing store failed).
    #[error("authorization backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AuthError {
    pub fn denied(reason: impl Into<String>) -> Self {
        AuthError::Denied(reason.into())
    }
}

/// Authorization gates and lifecycle notifications for proxied clients.
///
/// `auth_*` methods run before the action reaches the upstream broker; an
/// error drops that one action. Notifications run after the action has been
/// forwarded and cannot veto anything, so they should return promptly.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called once per connection, right after CONNECT is parsed and before
    /// the upstream broker is dialed. An error closes the connection.
    async fn auth_connect(&self, client: &Client) -> Result<(), AuthError>;

    /// Called before each PUBLISH is forwarded.
    async fn auth_publish(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), AuthError>;

    /// Called before each SUBSCRIBE is forwarded. The request is allowed or
    /// denied as a whole.
    async fn auth_subscribe(&self, client: &Client, topics: &[String]) -> Result<(), AuthError>;

    /// The client is connected and its CONNECT has been forwarded.
    async fn connect(&self, client: &Client);

    async fn publish(&self, client: &Client, topic: &str, payload: &[u8]);

    async fn subscribe(&self, client: &Client, topics: &[String]);

    async fn unsubscribe(&self, client: &Client, topics: &[String]);

    /// The connection ended, for whatever reason. Fires exactly once for
    /// every client that got a `connect` notification.
    async fn disconnect(&self, client: &Client);
}
