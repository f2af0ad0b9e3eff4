//! Startup orchestration.
//!
//! # Responsibilities
//! - Decide TLS vs plaintext mode from configuration
//! - Load TLS material before anything binds
//! - Start the selected listener pair and the interrupt watcher concurrently
//! - Return the first terminal outcome
//!
//! # Design Decisions
//! - Fail fast: a TLS loading error is fatal and no port is opened
//! - Exactly one listener pair per process: never both, never neither
//! - No supervised restart: one listener failure ends the process

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::ProxyConfig;
use crate::http::WsProxy;
use crate::lifecycle::shutdown::{ListenerKind, Shutdown, Termination};
use crate::lifecycle::signals;
use crate::mqtt::MqttProxy;
use crate::net::{load_tls_config, ListenerError, TlsError};
use crate::session::Handler;

/// Two listeners plus the interrupt watcher.
const TERMINATION_SOURCES: usize = 3;

/// Error type for startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[from] TlsError),
}

/// The listener pair a configuration selects.
pub fn planned_listeners(config: &ProxyConfig) -> [ListenerKind; 2] {
    if config.tls.client_tls {
        [ListenerKind::Wss, ListenerKind::Mqtts]
    } else {
        [ListenerKind::Ws, ListenerKind::Mqtt]
    }
}

type ListenerFuture = BoxFuture<'static, Result<(), ListenerError>>;

/// Owns the configuration and handler for the process lifetime.
pub struct Orchestrator {
    config: Arc<ProxyConfig>,
    handler: Arc<dyn Handler>,
}

impl Orchestrator {
    pub fn new(config: ProxyConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            config: Arc::new(config),
            handler,
        }
    }

    /// Run until a listener fails or the process receives SIGINT.
    pub async fn run(self) -> Result<Termination, StartupError> {
        self.run_until(signals::interrupt()).await
    }

    /// Run until a listener fails or `interrupt` resolves.
    ///
    /// `interrupt` yields a description of the stop request.
    pub async fn run_until<F>(self, interrupt: F) -> Result<Termination, StartupError>
    where
        F: Future<Output = String> + Send + 'static,
    {
        let tls = if self.config.tls.client_tls {
            Some(load_tls_config(
                &self.config.tls.ca_certs,
                &self.config.tls.server_cert,
                &self.config.tls.server_key,
            )?)
        } else {
            None
        };

        let listeners: Vec<(ListenerKind, ListenerFuture)> = match tls {
            None => vec![
                (ListenerKind::Ws, self.ws()),
                (ListenerKind::Mqtt, self.mqtt()),
            ],
            Some(tls) => vec![
                (ListenerKind::Wss, self.wss(tls.clone())),
                (ListenerKind::Mqtts, self.mqtts(tls)),
            ],
        };

        let mut shutdown = Shutdown::new(TERMINATION_SOURCES);
        let mut tasks = Vec::with_capacity(TERMINATION_SOURCES);

        for (kind, listener) in listeners {
            let reporter = shutdown.reporter();
            tracing::info!(listener = %kind, port = self.port(kind), "Starting {kind} proxy");
            tasks.push(tokio::spawn(async move {
                let error = match listener.await {
                    Ok(()) => ListenerError::Stopped,
                    Err(e) => e,
                };
                reporter.report(Termination::Listener { kind, error });
            }));
        }

        let reporter = shutdown.reporter();
        tasks.push(tokio::spawn(async move {
            let signal = interrupt.await;
            reporter.report(Termination::Interrupted(signal));
        }));

        let termination = shutdown.wait().await;
        for task in &tasks {
            task.abort();
        }
        Ok(termination)
    }

    fn port(&self, kind: ListenerKind) -> u16 {
        match kind {
            ListenerKind::Ws => self.config.ws.port,
            ListenerKind::Wss => self.config.ws.wss_port,
            ListenerKind::Mqtt => self.config.mqtt.port,
            ListenerKind::Mqtts => self.config.mqtt.mqtts_port,
        }
    }

    fn ws_proxy(&self, path: &str) -> WsProxy {
        WsProxy::new(self.config.ws_target_url(), path, self.handler.clone())
            .with_max_connections(self.config.limits.max_connections)
            .with_max_packet_size(self.config.limits.max_packet_size)
    }

    fn mqtt_proxy(&self, address: String) -> MqttProxy {
        MqttProxy::new(address, self.config.mqtt_target(), self.handler.clone())
            .with_max_connections(self.config.limits.max_connections)
            .with_max_packet_size(self.config.limits.max_packet_size)
    }

    fn ws(&self) -> ListenerFuture {
        let config = self.config.clone();
        let proxy = self.ws_proxy(&config.ws.path);
        async move { proxy.listen(&config.ws.host, config.ws.port).await }.boxed()
    }

    fn wss(&self, tls: Arc<ServerConfig>) -> ListenerFuture {
        let config = self.config.clone();
        let proxy = self.ws_proxy(&config.ws.wss_path);
        async move { proxy.listen_tls(&config.ws.host, config.ws.wss_port, tls).await }.boxed()
    }

    fn mqtt(&self) -> ListenerFuture {
        self.mqtt_proxy(self.config.mqtt_address()).listen().boxed()
    }

    fn mqtts(&self, tls: Arc<ServerConfig>) -> ListenerFuture {
        self.mqtt_proxy(self.config.mqtts_address())
            .listen_tls(TlsAcceptor::from(tls))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_mode_plans_ws_and_mqtt() {
        let config = ProxyConfig::default();
        assert_eq!(
            planned_listeners(&config),
            [ListenerKind::Ws, ListenerKind::Mqtt]
        );
    }

    #[test]
    fn tls_mode_plans_wss_and_mqtts() {
        let mut config = ProxyConfig::default();
        config.tls.client_tls = true;
        assert_eq!(
            planned_listeners(&config),
            [ListenerKind::Wss, ListenerKind::Mqtts]
        );
    }
}
