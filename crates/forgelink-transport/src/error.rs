use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in endpoint transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint name cannot be used as a local pipe identity.
    #[error("invalid endpoint name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Failed to bind the endpoint.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Failed to connect to the endpoint.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// The endpoint did not accept a connection within the allotted time.
    #[error("timed out after {timeout:?} connecting to {address}")]
    Timeout { address: String, timeout: Duration },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// True if the error means "the worker has not created the endpoint yet"
    /// (or it is momentarily busy), so a connect attempt is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect { source, .. } => is_not_ready(source),
            _ => false,
        }
    }
}

pub(crate) fn is_not_ready(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    if matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::WouldBlock
    ) {
        return true;
    }

    // ERROR_PIPE_BUSY: every server instance is taken; a new one is coming.
    #[cfg(windows)]
    if err.raw_os_error() == Some(231) {
        return true;
    }

    false
}

pub type Result<T> = std::result::Result<T, TransportError>;
