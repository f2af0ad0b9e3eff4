//! Process-wide termination channel.
//!
//! Every listener task and the interrupt watcher hold a [`Reporter`] and
//! write at most one [`Termination`] through it. The orchestrator waits for
//! the first one and stops the process; later reports are discarded.

use std::fmt;

use tokio::sync::mpsc;

use crate::net::ListenerError;

/// The listeners the proxy can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Ws,
    Wss,
    Mqtt,
    Mqtts,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerKind::Ws => "WS",
            ListenerKind::Wss => "WSS",
            ListenerKind::Mqtt => "MQTT",
            ListenerKind::Mqtts => "MQTTS",
        };
        f.write_str(name)
    }
}

/// Why the process is stopping.
#[derive(Debug)]
pub enum Termination {
    /// A listener's accept loop ended.
    Listener {
        kind: ListenerKind,
        error: ListenerError,
    },
    /// The operator asked the process to stop.
    Interrupted(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Listener { kind, error } => write!(f, "{kind} proxy failed: {error}"),
            Termination::Interrupted(signal) => write!(f, "{signal}"),
        }
    }
}

/// Coordinator for process termination.
///
/// Bounded so a reporter never blocks: capacity must cover every source.
pub struct Shutdown {
    tx: mpsc::Sender<Termination>,
    rx: mpsc::Receiver<Termination>,
}

impl Shutdown {
    /// Create a channel for `sources` concurrent reporters.
    pub fn new(sources: usize) -> Self {
        let (tx, rx) = mpsc::channel(sources.max(1));
        Self { tx, rx }
    }

    /// Handle for one termination source.
    pub fn reporter(&self) -> Reporter {
        Reporter {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the first termination.
    pub async fn wait(&mut self) -> Termination {
        match self.rx.recv().await {
            Some(termination) => termination,
            // `self.tx` keeps the channel open, so `recv` cannot observe closure.
            None => std::future::pending().await,
        }
    }
}

/// Write side held by a single termination source.
#[derive(Debug)]
pub struct Reporter {
    tx: mpsc::Sender<Termination>,
}

impl Reporter {
    /// Report this source's outcome. Consumes the reporter: one outcome per source.
    pub fn report(self, termination: Termination) {
        if let Err(e) = self.tx.try_send(termination) {
            tracing::debug!(termination = %e.into_inner(), "Termination already pending, dropped");
        }
    }
}
