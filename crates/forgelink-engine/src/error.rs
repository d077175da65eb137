use std::path::PathBuf;
use std::time::Duration;

use forgelink_transport::TransportError;

use crate::status::ConnectionStatus;

/// Errors from launching the engine worker.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The executable path is empty or does not name an existing file.
    #[error("engine executable path is invalid: {path:?}")]
    PathInvalid { path: PathBuf },

    /// This supervisor already has a live worker.
    #[error("engine process already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// The OS refused to start the process.
    #[error("failed to spawn engine process {path:?}: {source}")]
    SpawnFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from opening the pipe to the worker.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The worker did not open its endpoint in time.
    #[error("timed out after {0:?} waiting for engine pipe")]
    Timeout(Duration),

    /// Transport-level failure other than "not there yet".
    #[error("engine pipe I/O error: {0}")]
    Io(#[source] TransportError),

    /// A connection is already open on this transport.
    #[error("engine pipe is already connected")]
    AlreadyConnected,

    /// The attempt was cancelled by a disconnect or stop request.
    #[error("engine pipe connect cancelled")]
    Cancelled,
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout, .. } => ConnectError::Timeout(timeout),
            other => ConnectError::Io(other),
        }
    }
}

/// Errors from writing to the pipe.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// There is no open connection; nothing was written.
    #[error("engine pipe is not connected")]
    NotConnected,

    /// The write or flush failed; the connection has been torn down.
    #[error("engine pipe write failed: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] forgelink_frame::FrameError),
}

/// Errors from starting the receive loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("engine pipe is not connected")]
    NotConnected,

    #[error("receive loop already running for this connection")]
    AlreadyRunning,
}

/// Errors surfaced by [`EngineHandle`](crate::EngineHandle) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    /// The worker went away while the operation was waiting on it.
    #[error("engine process exited: {0}")]
    ProcessExited(String),

    /// The request is not valid in the current connection state.
    #[error("cannot {action} while {status:?}")]
    InvalidState {
        action: &'static str,
        status: ConnectionStatus,
    },

    /// The control loop has shut down.
    #[error("engine connection is closed")]
    Closed,
}

/// Errors reading or writing persisted editor settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("settings JSON error at {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
