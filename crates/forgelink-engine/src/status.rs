use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Coarse connection state shown by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No worker process.
    #[default]
    Disconnected,
    /// Worker is running, pipe not (or no longer) open.
    ProcessRunningNoPipe,
    /// Worker is running and the pipe is open.
    Connected,
}

/// Presentation hint for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Error,
    Warn,
    Ok,
}

impl ConnectionStatus {
    pub fn tone(self) -> StatusTone {
        match self {
            ConnectionStatus::Disconnected => StatusTone::Error,
            ConnectionStatus::ProcessRunningNoPipe => StatusTone::Warn,
            ConnectionStatus::Connected => StatusTone::Ok,
        }
    }

    pub fn is_process_running(self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Disconnected => "Engine Server: Not Connected",
            ConnectionStatus::ProcessRunningNoPipe => "Engine Server: Connected + No Pipe",
            ConnectionStatus::Connected => "Engine Server: Connected + Piped",
        })
    }
}

/// Fan-out of status changes.
///
/// Every subscriber gets every transition, in order, without the publisher
/// ever waiting on a slow one. The latest value is always available through
/// [`current`](Self::current).
#[derive(Debug)]
pub struct StatusPublisher {
    current: watch::Sender<ConnectionStatus>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionStatus>>>,
}

impl StatusPublisher {
    pub fn new(initial: ConnectionStatus) -> Self {
        let (current, _) = watch::channel(initial);
        Self {
            current,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        *self.current.borrow()
    }

    /// Record a new status. Returns `false` when it equals the current one,
    /// in which case nobody is notified.
    pub fn publish(&self, status: ConnectionStatus) -> bool {
        let changed = self.current.send_if_modified(|value| {
            if *value == status {
                false
            } else {
                *value = status;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::debug!(%status, "engine connection status changed");
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| tx.send(status).is_ok());
        true
    }

    /// Register for every subsequent change.
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(tx);
        StatusSubscription { rx }
    }

    /// A watch receiver for consumers that only care about the latest value.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.current.subscribe()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }
}

/// Ordered stream of status changes for one observer.
#[derive(Debug)]
pub struct StatusSubscription {
    rx: mpsc::UnboundedReceiver<ConnectionStatus>,
}

impl StatusSubscription {
    /// Next change, or `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<ConnectionStatus> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ConnectionStatus> {
        self.rx.try_recv().ok()
    }
}
