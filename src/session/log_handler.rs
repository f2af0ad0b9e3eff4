//! Default handler: allow everything, log everything.

use async_trait::async_trait;

use crate::session::client::Client;
use crate::session::handler::{AuthError, Handler};

/// Allows every action and writes one `info` event per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl LogHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn auth_connect(&self, client: &Client) -> Result<(), AuthError> {
        tracing::info!(
            client_id = %client.id,
            username = %client.username,
            client_cn = client.cert_subject.as_deref().unwrap_or(""),
            "auth_connect"
        );
        Ok(())
    }

    async fn auth_publish(&self, client: &Client, topic: &str, payload: &[u8]) -> Result<(), AuthError> {
        tracing::info!(
            client_id = %client.id,
            topic,
            payload = %String::from_utf8_lossy(payload),
            "auth_publish"
        );
        Ok(())
    }

    async fn auth_subscribe(&self, client: &Client, topics: &[String]) -> Result<(), AuthError> {
        tracing::info!(client_id = %client.id, topics = %topics.join(","), "auth_subscribe");
        Ok(())
    }

    async fn connect(&self, client: &Client) {
        tracing::info!(username = %client.username, client_id = %client.id, "connect");
    }

    async fn publish(&self, client: &Client, topic: &str, payload: &[u8]) {
        tracing::info!(
            username = %client.username,
            client_id = %client.id,
            topic,
            payload = %String::from_utf8_lossy(payload),
            "publish"
        );
    }

    async fn subscribe(&self, client: &Client, topics: &[String]) {
        tracing::info!(
            username = %client.username,
            client_id = %client.id,
            topics = %topics.join(","),
            "subscribe"
        );
    }

    async fn unsubscribe(&self, client: &Client, topics: &[String]) {
        tracing::info!(
            username = %client.username,
            client_id = %client.id,
            topics = %topics.join(","),
            "unsubscribe"
        );
    }

    async fn disconnect(&self, client: &Client) {
        tracing::info!(username = %client.username, client_id = %client.id, "disconnect");
    }
}
